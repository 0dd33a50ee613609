// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use arbor::merger::{merge, ClassificationResult, Subcategory};
use arbor::paths::PathResolver;
use arbor::tree::CategoryTree;

#[derive(Debug, Arbitrary)]
enum Input<'a> {
    /// Raw service response body
    Body(&'a [u8]),
    /// Labels as they might come out of a well-formed response
    Labels {
        main: Option<String>,
        subs: Vec<String>,
        single: bool,
    },
}

fuzz_target!(|inputs: Vec<Input>| {
    let mut tree = CategoryTree::new("Subjects");
    let resolver = PathResolver::new("/base");

    for input in inputs {
        let result = match input {
            Input::Body(body) => match serde_json::from_slice::<ClassificationResult>(body) {
                Ok(result) => result,
                Err(_) => continue,
            },
            Input::Labels { main, subs, single } => {
                let sub = if single {
                    subs.into_iter().next().map(Subcategory::One)
                } else {
                    Some(Subcategory::Many(subs))
                };
                ClassificationResult::new(main.as_deref(), sub)
            }
        };

        let merged = merge(&mut tree, &result);
        let again = merge(&mut tree, &result);
        assert_eq!(again.sub, merged.sub);
        assert_eq!(again.created, 0);

        // Every category stays exactly two levels below the base
        let dir = resolver.resolve(&tree, merged.sub);
        assert_eq!(dir.strip_prefix("/base").map(|p| p.components().count()), Ok(2));
    }

    if let Err(e) = tree.check_invariants() {
        panic!("{}", e);
    }
});
