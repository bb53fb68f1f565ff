//! 值代理属性测试
//!
//! 使用proptest验证宿主后端值的共享、驻留与解析性质

#[cfg(test)]
mod tests {
    use crate::values::node_path::ParsedPath;
    use crate::values::{Array, Dictionary, PackedInt32Array, StringName, Variant};
    use proptest::prelude::*;

    fn segment() -> impl Strategy<Value = String> {
        "[A-Za-z_][A-Za-z0-9_]{0,8}"
    }

    fn scalar() -> impl Strategy<Value = Variant> {
        prop_oneof![
            Just(Variant::Nil),
            any::<bool>().prop_map(Variant::from),
            any::<i64>().prop_map(Variant::from),
            (-1.0e6f64..1.0e6).prop_map(Variant::from),
            segment().prop_map(Variant::from),
        ]
    }

    proptest! {
        #[test]
        fn node_path_text_is_canonical(
            absolute in any::<bool>(),
            names in prop::collection::vec(segment(), 0..5),
            subnames in prop::collection::vec(segment(), 0..3)
        ) {
            let path = ParsedPath { absolute, names, subnames };
            let reparsed = ParsedPath::parse(&path.to_text());
            prop_assert_eq!(reparsed, path);
        }

        #[test]
        fn array_clone_is_isolated_from_mutation(
            items in prop::collection::vec(scalar(), 0..16),
            extra in scalar()
        ) {
            let original: Array = items.clone().into_iter().collect();
            let mut copy = original.clone();
            copy.push(extra).unwrap();
            if !items.is_empty() {
                copy.remove(0).unwrap();
            }
            prop_assert_eq!(original.to_vec().unwrap(), items);
        }

        #[test]
        fn dictionary_last_write_wins(
            entries in prop::collection::vec((segment(), any::<i64>()), 0..16)
        ) {
            let mut dict = Dictionary::new();
            for (key, value) in &entries {
                dict.set(key.as_str(), *value).unwrap();
            }
            for (key, _) in &entries {
                let last = entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| *v);
                prop_assert_eq!(dict.get(key.as_str()).unwrap(), last.map(Variant::from));
            }
            prop_assert!(dict.len().unwrap() <= entries.len());
        }

        #[test]
        fn string_name_identity_follows_text(a in segment(), b in segment()) {
            let x = StringName::new(&a);
            let y = StringName::new(&b);
            prop_assert_eq!(x == y, a == b);
        }

        #[test]
        fn packed_slice_matches_vec(items in prop::collection::vec(any::<i32>(), 0..64)) {
            let packed = PackedInt32Array::from_vec(items.clone());
            prop_assert_eq!(packed.as_slice().unwrap(), items.as_slice());
        }
    }
}
