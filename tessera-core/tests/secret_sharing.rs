use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use tessera_core::secret::{combine, split};

#[test]
fn split_combine_roundtrip() {
    let mut rng = StdRng::seed_from_u64(7);
    let secret = b"correct horse battery staple".to_vec();
    let shares = split(&secret, 5, 3, &mut rng);
    assert_eq!(shares.len(), 5);

    // Any 3 of 5 reconstruct.
    for drop in [(1u8, 2u8), (2, 5), (3, 4)] {
        let mut subset = shares.clone();
        subset.remove(&drop.0);
        subset.remove(&drop.1);
        assert_eq!(combine(&subset).unwrap(), secret);
    }
}

#[test]
fn below_threshold_is_garbage_not_secret() {
    let mut rng = StdRng::seed_from_u64(8);
    let secret = vec![0xAB; 64];
    let shares = split(&secret, 5, 3, &mut rng);
    let two: BTreeMap<u8, Vec<u8>> = shares.into_iter().take(2).collect();
    assert_ne!(combine(&two).unwrap(), secret);
}

#[test]
fn combine_rejects_malformed_share_sets() {
    let mut rng = StdRng::seed_from_u64(9);
    let shares = split(&[1, 2, 3], 4, 2, &mut rng);

    assert!(combine(&BTreeMap::new()).is_err());

    let mut uneven = shares.clone();
    uneven.get_mut(&2).unwrap().pop();
    assert!(combine(&uneven).is_err());

    let mut zero_label = shares;
    let share = zero_label.remove(&1).unwrap();
    zero_label.insert(0, share);
    assert!(combine(&zero_label).is_err());
}
