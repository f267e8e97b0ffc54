use crate::ro::check_and_get_buffer_size;
use crate::*;

fn filled() -> TupleRw {
    let mut pt = TupleRw::alloc(8, 128).unwrap();
    pt.insert_u16(1, 0xBEEF).unwrap();
    pt.insert_i32(2, -1).unwrap();
    pt.insert_str(3, "fetch me").unwrap();
    pt.insert_f32(4, 1.5).unwrap();
    pt
}

// -------------------- round trips --------------------

#[test]
fn fetch_round_trips_bytes() {
    let mut pt = filled();
    let origin = pt.take().as_bytes().to_vec();
    let ro = TupleRo::new(&origin).unwrap();

    let mut fetched = TupleRw::fetch(ro, BUFFER_LIMIT, 0).unwrap();
    assert_eq!(fetched.take().as_bytes(), &origin[..]);
}

#[test]
fn fetch_empty_tuple() {
    let mut pt = TupleRw::alloc(0, 0).unwrap();
    let bytes = pt.take().as_bytes().to_vec();
    let ro = TupleRo::new(&bytes).unwrap();
    let mut fetched = TupleRw::fetch(ro, space(0, 0), 0).unwrap();
    assert_eq!(fetched.take().total_bytes(), UNIT_SIZE);
}

#[test]
fn fetch_with_headroom_allows_more_inserts() {
    let mut pt = filled();
    let bytes = pt.take().as_bytes().to_vec();
    let ro = TupleRo::new(&bytes).unwrap();

    let mut fetched = TupleRw::fetch(ro, BUFFER_LIMIT, 2).unwrap();
    fetched.insert_u64(9, 77).unwrap();
    let out = fetched.take();
    assert_eq!(out.check(), None);
    assert_eq!(out.get_u16(1), 0xBEEF);
    assert_eq!(out.get_str(3), Some("fetch me"));
    assert_eq!(out.get_u64(9), 77);
}

#[test]
fn fetch_rejects_small_buffer() {
    let mut pt = filled();
    let bytes = pt.take().as_bytes().to_vec();
    let ro = TupleRo::new(&bytes).unwrap();
    assert_eq!(
        TupleRw::fetch(ro, bytes.len() - UNIT_SIZE, 0).err(),
        Some(TupleError::NoSpace)
    );
}

#[test]
fn buffer_size_check_matches_fetch() {
    let mut pt = filled();
    let bytes = pt.take().as_bytes().to_vec();
    let ro = TupleRo::new(&bytes).unwrap();

    let need = check_and_get_buffer_size(ro, 0, 0).unwrap();
    assert!(TupleRw::fetch(ro, need, 0).is_ok());
    assert!(TupleRw::fetch(ro, need - UNIT_SIZE, 0).is_err());

    let roomy = check_and_get_buffer_size(ro, 3, 64).unwrap();
    assert_eq!(roomy, need + 3 * UNIT_SIZE + 64);
}

#[test]
fn fetch_preserves_junk_accounting() {
    let mut pt = filled();
    pt.erase(3, TypeMatch::ANY);
    // serialize without compaction so the dead descriptor travels along
    let bytes = pt.take_noshrink().as_bytes().to_vec();
    let ro = TupleRo::new(&bytes).unwrap();
    assert!(ro.items() > ro.live_items());

    let mut fetched = TupleRw::fetch(ro, BUFFER_LIMIT, 0).unwrap();
    assert!(fetched.junkspace() > 0);
    assert!(fetched.cond_shrink());
    let out = fetched.take_noshrink();
    assert_eq!(out.check(), None);
    assert_eq!(out.items(), out.live_items());
    assert_eq!(out.get_str(3), None);
    assert_eq!(out.get_u16(1), 0xBEEF);
}
