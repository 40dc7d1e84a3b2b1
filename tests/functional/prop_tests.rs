//! Property tests for the pure transformation helpers.

use std::collections::BTreeMap;

use proptest::prelude::*;

use migration_operator::controller::apply::plural_name;
use migration_operator::controller::resources::labels_in_whitelist;
use migration_operator::unstructured::as_integer;

proptest! {
    /// The dynamic resource name is always the lowercased kind plus "s".
    #[test]
    fn plural_name_is_lowercase_kind_with_s(kind in "[A-Za-z]{1,30}") {
        let plural = plural_name(&kind);
        prop_assert_eq!(&plural, &format!("{}s", kind.to_lowercase()));
        prop_assert!(plural.ends_with('s'));
        prop_assert_eq!(plural.to_lowercase(), plural.clone());
    }

    /// Any integer that fits in i64 round-trips through the accessor.
    #[test]
    fn as_integer_roundtrips_i64(value in any::<i64>()) {
        prop_assert_eq!(as_integer(&serde_json::json!(value)), Some(value));
    }

    /// Non-integral floats are always rejected.
    #[test]
    fn as_integer_rejects_fractional(value in -1_000_000.0f64..1_000_000.0) {
        prop_assume!(value.fract() != 0.0);
        prop_assert_eq!(as_integer(&serde_json::json!(value)), None);
    }

    /// A label set always whitelists any subset of itself.
    #[test]
    fn labels_whitelist_their_subsets(
        labels in proptest::collection::btree_map("[a-z]{1,8}", "[a-z]{1,8}", 0..6),
        extra_key in "[A-Z]{1,8}",
    ) {
        prop_assert!(labels_in_whitelist(&labels, &labels));
        prop_assert!(labels_in_whitelist(&BTreeMap::new(), &labels));

        // A selector absent from the labels must fail when labels lack it.
        let mut selectors = labels.clone();
        selectors.insert(extra_key, "missing".to_string());
        prop_assert!(!labels_in_whitelist(&selectors, &labels));
    }
}
