use super::*;

define_idx!(TestId);

#[test]
fn push_returns_sequential_indices() {
    let mut v: IndexVec<TestId, i32> = IndexVec::new();
    let a = v.push(10);
    let b = v.push(20);
    assert_eq!(a, TestId(0));
    assert_eq!(b, TestId(1));
    assert_eq!(v[a], 10);
    assert_eq!(v[b], 20);
}

#[test]
fn get_out_of_bounds_is_none() {
    let mut v: IndexVec<TestId, i32> = IndexVec::new();
    v.push(1);
    assert_eq!(v.get(TestId(0)), Some(&1));
    assert_eq!(v.get(TestId(1)), None);
}

#[test]
fn iter_enumerated_matches_indices() {
    let mut v: IndexVec<TestId, &str> = IndexVec::new();
    v.push("a");
    v.push("b");
    let pairs: Vec<_> = v.iter_enumerated().collect();
    assert_eq!(pairs, vec![(TestId(0), &"a"), (TestId(1), &"b")]);
}

#[test]
fn next_index_tracks_len() {
    let mut v: IndexVec<TestId, u8> = IndexVec::new();
    assert_eq!(v.next_index(), TestId(0));
    v.push(0);
    assert_eq!(v.next_index(), TestId(1));
}

#[quickcheck_macros::quickcheck]
fn pushed_values_are_retrievable(values: Vec<u32>) -> bool {
    let mut v: IndexVec<TestId, u32> = IndexVec::new();
    let ids: Vec<_> = values.iter().map(|&x| v.push(x)).collect();
    ids.iter().zip(&values).all(|(&id, &x)| v[id] == x)
}

#[quickcheck_macros::quickcheck]
fn interned_symbol_round_trips(s: String) -> bool {
    let sym = crate::Symbol::intern(&s);
    sym.as_str() == s
}
