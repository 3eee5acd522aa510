//! Paginated document assembly.
//!
//! Each embedded image becomes one page whose MediaBox equals the image's
//! pixel size in points, so the image fills its page edge to edge with no
//! margins and no resampling. Pages follow the order of the input slice.

use crate::error::ConvertError;
use crate::output::{EncodedPage, Encoding};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::debug;

const PDF_VERSION: &str = "1.7";
const IMAGE_NAME: &str = "Im0";

/// Build a document with one full-bleed page per image, in slice order.
pub fn build_document(images: &[EncodedPage]) -> Result<Document, ConvertError> {
    if images.is_empty() {
        return Err(ConvertError::NoImages);
    }

    let mut doc = Document::with_version(PDF_VERSION);
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(images.len());
    for image in images {
        let page_id = add_image_page(&mut doc, pages_id, image)?;
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    debug!("Assembled document with {} pages", count);
    Ok(doc)
}

fn add_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    image: &EncodedPage,
) -> Result<ObjectId, ConvertError> {
    let (width, height) = (i64::from(image.width), i64::from(image.height));

    let image_id = add_image_xobject(doc, image)?;

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let encoded = content.encode().map_err(|e| {
        ConvertError::Internal(format!(
            "content stream for image #{}: {}",
            image.index + 1,
            e
        ))
    })?;
    let content_id = doc.add_object(Stream::new(Dictionary::new(), encoded));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                IMAGE_NAME => image_id,
            },
        },
        "Contents" => content_id,
    });
    Ok(page_id)
}

fn add_image_xobject(doc: &mut Document, image: &EncodedPage) -> Result<ObjectId, ConvertError> {
    let (filter, smask) = match &image.encoding {
        Encoding::Jpeg => ("DCTDecode", None),
        Encoding::FlateRgb { alpha } => ("FlateDecode", alpha.as_ref()),
        Encoding::Png => {
            return Err(ConvertError::Internal(format!(
                "image #{} was not prepared for embedding",
                image.index + 1
            )))
        }
    };

    let mut dict = image_dict(image.width, image.height, "DeviceRGB", filter);
    if let Some(alpha) = smask {
        let mask = Stream::new(
            image_dict(image.width, image.height, "DeviceGray", "FlateDecode"),
            alpha.clone(),
        );
        let mask_id = doc.add_object(mask);
        dict.set("SMask", mask_id);
    }

    Ok(doc.add_object(Stream::new(dict, image.bytes.clone())))
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(width),
        "Height" => i64::from(height),
        "ColorSpace" => Object::Name(color_space.as_bytes().to_vec()),
        "BitsPerComponent" => 8,
        "Filter" => Object::Name(filter.as_bytes().to_vec()),
    }
}

/// Write the Info dictionary: producer, creator, title, and timestamps.
pub fn stamp_metadata(doc: &mut Document, title: &str) {
    let now = chrono::Utc::now().format("D:%Y%m%d%H%M%SZ").to_string();
    let literal = |s: &str| Object::String(s.as_bytes().to_vec(), StringFormat::Literal);

    let info_id = doc.add_object(dictionary! {
        "Producer" => literal(&format!("pagemill {}", env!("CARGO_PKG_VERSION"))),
        "Creator" => literal("pagemill"),
        "Title" => literal(title),
        "CreationDate" => literal(&now),
        "ModDate" => literal(&now),
    });
    doc.trailer.set("Info", info_id);
}

/// Serialise the document.
pub fn to_bytes(doc: &mut Document) -> Result<Vec<u8>, ConvertError> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf)
        .map_err(|e| ConvertError::Internal(format!("failed to serialise document: {e}")))?;
    Ok(buf)
}
