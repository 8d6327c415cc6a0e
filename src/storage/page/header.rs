//! Header page layout. Page 0 of the database file records, for every index,
//! the page id of its current root.
//!
//! Layout:
//! - record count: u32
//! - records, each: name length (u16), name bytes, root page id (u32)

use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

const COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Longest index name a header record can carry.
pub const MAX_NAME_LEN: usize = 32;

fn record_count(page: &Page) -> usize {
    LittleEndian::read_u32(&page.data[COUNT_OFFSET..COUNT_OFFSET + 4]) as usize
}

fn set_record_count(page: &mut Page, count: usize) {
    LittleEndian::write_u32(&mut page.data[COUNT_OFFSET..COUNT_OFFSET + 4], count as u32);
}

/// Walk the records, yielding `(name_start, name_len, root_offset)` triples.
fn walk(page: &Page) -> Vec<(usize, usize, usize)> {
    let mut records = Vec::with_capacity(record_count(page));
    let mut offset = RECORDS_OFFSET;
    for _ in 0..record_count(page) {
        let name_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        records.push((offset + 2, name_len, offset + 2 + name_len));
        offset += 2 + name_len + 4;
    }
    records
}

/// Look up the root page id recorded for `name`.
pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
    walk(page)
        .into_iter()
        .find(|&(start, len, _)| &page.data[start..start + len] == name.as_bytes())
        .map(|(_, _, root)| LittleEndian::read_u32(&page.data[root..root + 4]))
}

/// Record `name -> root_page_id`. Returns false when the name is already
/// present, is too long, or the page is out of space.
pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    if name.len() > MAX_NAME_LEN || get_root_id(page, name).is_some() {
        return false;
    }

    let end = walk(page)
        .last()
        .map(|&(_, _, root)| root + 4)
        .unwrap_or(RECORDS_OFFSET);
    if end + 2 + name.len() + 4 > PAGE_SIZE {
        return false;
    }

    LittleEndian::write_u16(&mut page.data[end..end + 2], name.len() as u16);
    page.data[end + 2..end + 2 + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_u32(
        &mut page.data[end + 2 + name.len()..end + 2 + name.len() + 4],
        root_page_id,
    );
    let count = record_count(page);
    set_record_count(page, count + 1);
    true
}

/// Update the root page id recorded for `name`. Returns false when absent.
pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    let hit = walk(page)
        .into_iter()
        .find(|&(start, len, _)| &page.data[start..start + len] == name.as_bytes());
    match hit {
        Some((_, _, root)) => {
            LittleEndian::write_u32(&mut page.data[root..root + 4], root_page_id);
            true
        }
        None => false,
    }
}

/// Insert-or-update in one step.
pub fn upsert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    update_record(page, name, root_page_id) || insert_record(page, name, root_page_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::HEADER_PAGE_ID;

    #[test]
    fn test_header_insert_and_get() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(insert_record(&mut page, "orders_pk", 7));
        assert!(insert_record(&mut page, "users_pk", 12));

        assert_eq!(get_root_id(&page, "orders_pk"), Some(7));
        assert_eq!(get_root_id(&page, "users_pk"), Some(12));
        assert_eq!(get_root_id(&page, "missing"), None);
    }

    #[test]
    fn test_header_update() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(!update_record(&mut page, "orders_pk", 3));
        assert!(insert_record(&mut page, "orders_pk", 3));
        assert!(update_record(&mut page, "orders_pk", 44));
        assert_eq!(get_root_id(&page, "orders_pk"), Some(44));
    }

    #[test]
    fn test_header_duplicate_insert_rejected() {
        let mut page = Page::new(HEADER_PAGE_ID);
        assert!(insert_record(&mut page, "idx", 1));
        assert!(!insert_record(&mut page, "idx", 2));
        assert_eq!(get_root_id(&page, "idx"), Some(1));
    }
}
