#![cfg(test)]

// Property tests for Dict kept inside the crate so they can inspect the
// per-table counters directly.

use super::{Dict, DictError};
use crate::object::{Object, Robj};
use proptest::prelude::*;
use std::collections::HashMap;
use std::rc::Rc;

// Pool-indexed operations so shrinking converges on small key sets.
#[derive(Clone, Debug)]
enum OpI {
    Add(usize, i32),
    Set(usize, i32),
    Delete(usize),
    Get(usize),
    Random,
    Rehash(usize),
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{1,6}", 1..=64).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Add(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Set(i, v)),
            2 => idx.clone().prop_map(OpI::Delete),
            2 => idx.clone().prop_map(OpI::Get),
            1 => Just(OpI::Random),
            1 => (0usize..4).prop_map(OpI::Rehash),
        ];
        proptest::collection::vec(op, 1..200).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Property: the dict agrees with std::collections::HashMap under random
// add/set/delete/get sequences, and the per-table `used` counters always sum
// to the number of live keys, rehashing or not.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let mut sut: Dict<String, i32> = Dict::new();
        let mut model: HashMap<String, i32> = HashMap::new();

        for op in ops {
            match op {
                OpI::Add(i, v) => {
                    let k = pool[i].clone();
                    let expected = if model.contains_key(&k) {
                        Err(DictError::KeyExists)
                    } else {
                        model.insert(k.clone(), v);
                        Ok(())
                    };
                    prop_assert_eq!(sut.add(k, v), expected);
                }
                OpI::Set(i, v) => {
                    let k = pool[i].clone();
                    model.insert(k.clone(), v);
                    prop_assert_eq!(sut.set(k, v), Ok(()));
                }
                OpI::Delete(i) => {
                    let expected = match model.remove(&pool[i]) {
                        Some(_) => Ok(()),
                        None => Err(DictError::KeyNotFound),
                    };
                    prop_assert_eq!(sut.delete(&pool[i]), expected);
                }
                OpI::Get(i) => {
                    prop_assert_eq!(sut.get(&pool[i]), model.get(&pool[i]));
                }
                OpI::Random => {
                    match sut.random_entry() {
                        Some((k, v)) => prop_assert_eq!(model.get(k), Some(v)),
                        None => prop_assert!(model.is_empty()),
                    }
                }
                OpI::Rehash(n) => {
                    sut.rehash(n);
                }
            }

            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.table_used(0) + sut.table_used(1), model.len());
            prop_assert_eq!(sut.iter().count(), model.len());
            prop_assert_eq!(sut.is_rehashing(), sut.table_size(1) > 0);
            if sut.table_size(0) > 0 {
                prop_assert!(sut.table_size(0).is_power_of_two());
            }
        }

        // Lookups alone drive any pending rehash to completion.
        let mut guard = 0;
        while sut.is_rehashing() {
            let _ = sut.get("");
            guard += 1;
            prop_assert!(guard <= sut.table_size(0) + 1);
        }
        prop_assert_eq!(sut.table_size(1), 0);
        for (k, v) in &model {
            prop_assert_eq!(sut.get(k), Some(v));
        }
    }
}

// Property: inserting then deleting object pairs leaves every reference
// count where it started, and overwrites move exactly one reference.
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn prop_refcounts_balance(n in 1usize..100) {
        let keys: Vec<Robj> = (0..n).map(|i| Object::string(format!("k{}", i))).collect();
        let vals: Vec<Robj> = (0..n).map(|i| Object::int(i as i64)).collect();
        let mut dict: Dict<Robj, Robj> = Dict::new();

        for (k, v) in keys.iter().zip(&vals) {
            dict.add(Rc::clone(k), Rc::clone(v)).unwrap();
        }
        for (k, v) in keys.iter().zip(&vals) {
            prop_assert_eq!(Rc::strong_count(k), 2);
            prop_assert_eq!(Rc::strong_count(v), 2);
        }

        let replacement = Object::string("replacement");
        dict.set(Rc::clone(&keys[0]), Rc::clone(&replacement)).unwrap();
        prop_assert_eq!(Rc::strong_count(&vals[0]), 1);
        prop_assert_eq!(Rc::strong_count(&replacement), 2);

        for k in &keys {
            dict.delete(k).unwrap();
        }
        prop_assert!(dict.is_empty());
        for (k, v) in keys.iter().zip(&vals) {
            prop_assert_eq!(Rc::strong_count(k), 1);
            prop_assert_eq!(Rc::strong_count(v), 1);
        }
        prop_assert_eq!(Rc::strong_count(&replacement), 1);
    }
}
