use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::Serialize;

use crate::bounding_boxes::BoxSequence;
use crate::crop_params::{self, MarginPolicy, Rectangle};
use crate::error::{CropError, Result};
use crate::incremental::IndirectReference;

/// A page in document order together with the indirect object that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlot {
    pub index: usize,
    pub reference: IndirectReference,
}

/// The crop decided for one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageCrop {
    pub index: usize,
    pub reference: IndirectReference,
    pub source: Rectangle,
    pub crop: Rectangle,
}

// ========== small helpers ==========
#[inline]
fn dict_get<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok()
}

fn as_f64(n: &Object) -> Option<f64> {
    match n {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

/// Whole numbers are written as integers, everything else as reals.
fn number(v: f64) -> Object {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Object::Integer(v as i64)
    } else {
        Object::from(v)
    }
}

pub fn rect_object(r: Rectangle) -> Object {
    Object::Array(r.to_array().into_iter().map(number).collect())
}

// ========== page enumeration ==========
/// Every page in document order, each with its own object reference.
pub fn page_slots(doc: &Document) -> Vec<PageSlot> {
    doc.get_pages()
        .values()
        .enumerate()
        .map(|(index, id)| PageSlot {
            index,
            reference: IndirectReference::from(*id),
        })
        .collect()
}

/// Walk the Parent chain for an inherited /MediaBox. A chain that loops gives `None`.
pub fn effective_mediabox(doc: &Document, slot: &PageSlot) -> Option<Rectangle> {
    let mut id = slot.reference.object_id();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    while seen.insert(id) {
        let cur = doc.get_dictionary(id).ok()?;
        if let Some(Object::Array(a)) = dict_get(cur, b"MediaBox") {
            if let [x1, y1, x2, y2] = a.as_slice() {
                return Some(Rectangle::new(
                    as_f64(x1)?,
                    as_f64(y1)?,
                    as_f64(x2)?,
                    as_f64(y2)?,
                ));
            }
        }
        match dict_get(cur, b"Parent") {
            Some(Object::Reference(pid)) => id = *pid,
            _ => return None,
        }
    }
    tracing::debug!(page = slot.index + 1, "page tree loops without a /MediaBox");
    None
}

// ========== planning ==========
/// Pair pages with rectangles and apply the margin policy.
///
/// A finite rectangle list must have exactly one entry per page.
pub fn plan_crops(
    slots: &[PageSlot],
    boxes: &BoxSequence,
    policy: &MarginPolicy,
) -> Result<Vec<PageCrop>> {
    if let Some(n) = boxes.len() {
        if n != slots.len() {
            return Err(CropError::ConfigurationConflict(format!(
                "{n} bounding boxes for {} pages",
                slots.len()
            )));
        }
    }

    let plan = slots
        .iter()
        .zip(boxes.iter())
        .map(|(slot, source)| {
            let crop = crop_params::compute(source, slot.index, policy);
            if crop.is_degenerate() {
                tracing::warn!(page = slot.index + 1, ?source, ?crop, "empty or inverted crop box, using it as given");
            }
            PageCrop {
                index: slot.index,
                reference: slot.reference,
                source,
                crop,
            }
        })
        .collect();
    Ok(plan)
}

// ========== mutation ==========
/// Set /CropBox on the page object and hand back the updated object.
pub fn apply_crop_box(doc: &mut Document, crop: &PageCrop) -> Result<Object> {
    let slot = PageSlot {
        index: crop.index,
        reference: crop.reference,
    };
    if let Some(media) = effective_mediabox(doc, &slot) {
        let c = crop.crop;
        if c.x1 < media.x1 || c.y1 < media.y1 || c.x2 > media.x2 || c.y2 > media.y2 {
            tracing::debug!(page = crop.index + 1, ?media, crop = ?c, "crop box extends past the media box");
        }
    }

    let obj = doc.get_object_mut(crop.reference.object_id())?;
    obj.as_dict_mut()?.set("CropBox", rect_object(crop.crop));
    Ok(obj.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crop_params::MarginQuad;
    use lopdf::dictionary;
    use pretty_assertions::assert_eq;

    fn two_page_doc() -> Document {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let media = rect_object(Rectangle::new(0.0, 0.0, 612.0, 792.0));
        let kids: Vec<Object> = (0..2)
            .map(|_| {
                Object::Reference(doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => Object::Reference(pages_id),
                }))
            })
            .collect();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => 2,
                "MediaBox" => media,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        doc
    }

    #[test]
    fn slots_follow_page_order() {
        let doc = two_page_doc();
        let slots = page_slots(&doc);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].index, 0);
        assert_eq!(slots[1].index, 1);
        assert!(slots[0].reference.id < slots[1].reference.id);
    }

    #[test]
    fn media_box_is_inherited() {
        let doc = two_page_doc();
        let slots = page_slots(&doc);
        assert_eq!(
            effective_mediabox(&doc, &slots[1]),
            Some(Rectangle::new(0.0, 0.0, 612.0, 792.0))
        );
    }

    #[test]
    fn listed_boxes_must_match_page_count() {
        let doc = two_page_doc();
        let slots = page_slots(&doc);
        let boxes = BoxSequence::Listed(vec![Rectangle::new(1.0, 1.0, 2.0, 2.0)]);
        let err = plan_crops(&slots, &boxes, &MarginPolicy::default()).unwrap_err();
        assert!(matches!(err, CropError::ConfigurationConflict(_)));
    }

    #[test]
    fn plan_applies_alternating_margins() {
        let doc = two_page_doc();
        let slots = page_slots(&doc);
        let policy = MarginPolicy::new(MarginQuad::uniform(5.0), Some(MarginQuad::uniform(1.0)));
        let src = Rectangle::new(100.0, 100.0, 500.0, 700.0);
        let plan = plan_crops(&slots, &BoxSequence::Repeat(src), &policy).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].crop, Rectangle::new(99.0, 99.0, 501.0, 701.0));
        assert_eq!(plan[1].crop, Rectangle::new(95.0, 95.0, 505.0, 705.0));
    }

    #[test]
    fn crop_box_written_as_integers_when_whole() {
        let mut doc = two_page_doc();
        let slots = page_slots(&doc);
        let plan = plan_crops(
            &slots,
            &BoxSequence::Repeat(Rectangle::new(50.0, 50.5, 560.0, 740.0)),
            &MarginPolicy::default(),
        )
        .unwrap();
        let updated = apply_crop_box(&mut doc, &plan[0]).unwrap();
        let crop = updated.as_dict().unwrap().get(b"CropBox").unwrap().as_array().unwrap();
        assert!(matches!(crop[0], Object::Integer(50)));
        assert!(matches!(crop[1], Object::Real(_)));
        assert!(matches!(crop[3], Object::Integer(740)));

        let stored = doc.get_dictionary(slots[0].reference.object_id()).unwrap();
        assert!(stored.has(b"CropBox"));
    }

    #[test]
    fn looping_parent_chain_has_no_media_box() {
        let mut doc = two_page_doc();
        let slots = page_slots(&doc);
        let id = slots[0].reference.object_id();
        let page = doc.get_object_mut(id).unwrap().as_dict_mut().unwrap();
        page.set("Parent", Object::Reference(id));
        assert_eq!(effective_mediabox(&doc, &slots[0]), None);

        let plan = plan_crops(
            &slots,
            &BoxSequence::Repeat(Rectangle::new(10.0, 10.0, 20.0, 20.0)),
            &MarginPolicy::default(),
        )
        .unwrap();
        let updated = apply_crop_box(&mut doc, &plan[0]).unwrap();
        assert!(updated.as_dict().unwrap().has(b"CropBox"));
    }

    #[test]
    fn margins_can_make_a_valid_box_degenerate() {
        let doc = two_page_doc();
        let slots = page_slots(&doc);
        let policy = MarginPolicy::new(MarginQuad::uniform(-10.0), None);
        let src = Rectangle::new(100.0, 100.0, 110.0, 130.0);
        let plan = plan_crops(&slots, &BoxSequence::Repeat(src), &policy).unwrap();
        assert!(!plan[1].source.is_degenerate());
        assert!(plan[1].crop.is_degenerate());
        assert_eq!(plan[1].crop, Rectangle::new(110.0, 110.0, 100.0, 120.0));
    }
}
