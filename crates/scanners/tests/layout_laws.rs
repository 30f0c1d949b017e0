use proptest::prelude::*;
use proxyguard_scanners::{
    diff_layouts, AnalysisConfig, AnalysisTarget, Category, ContractLoader, ContractVersion,
    ScanningEngine,
};
use serde_json::json;

const TYPES: &[&str] = &[
    "uint256",
    "uint128",
    "uint8",
    "address",
    "bool",
    "bytes32",
    "string",
    "uint256[3]",
    "mapping(address => uint256)",
];

fn layout() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(TYPES), 0..8)
}

fn load(vars: &[(String, &str)]) -> ContractVersion {
    let storage: Vec<_> = vars
        .iter()
        .map(|(name, ty)| json!({"name": name, "type": ty}))
        .collect();
    let source = json!({"name": "Vault", "storage": storage}).to_string();
    match ContractLoader::new(&AnalysisConfig::default()).load_json(&source) {
        Ok(mut versions) => versions.remove(0),
        Err(e) => panic!("layout failed to load: {}", e),
    }
}

fn named(types: &[&'static str]) -> Vec<(String, &'static str)> {
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| (format!("v{}", i), *ty))
        .collect()
}

proptest! {
    #[test]
    fn appending_a_variable_is_always_safe(types in layout(), appended in prop::sample::select(TYPES)) {
        let old_vars = named(&types);
        let mut new_vars = old_vars.clone();
        new_vars.push(("appended".to_string(), appended));

        let findings = diff_layouts(&load(&old_vars), &load(&new_vars), &Default::default());
        prop_assert_eq!(findings.map(|f| f.len()).ok(), Some(0));
    }

    #[test]
    fn inserting_before_the_last_variable_shifts(
        types in prop::collection::vec(prop::sample::select(TYPES), 1..8),
        inserted in prop::sample::select(TYPES),
        at in any::<prop::sample::Index>(),
    ) {
        let old_vars = named(&types);
        let mut new_vars = old_vars.clone();
        new_vars.insert(at.index(old_vars.len()), ("inserted".to_string(), inserted));

        let findings = match diff_layouts(&load(&old_vars), &load(&new_vars), &Default::default()) {
            Ok(findings) => findings,
            Err(e) => panic!("diff failed: {}", e),
        };
        prop_assert!(findings.iter().any(|f| f.category == Category::StorageShift));
    }

    #[test]
    fn analysis_is_idempotent(old in layout(), new in layout(), guarded in any::<bool>()) {
        let modifiers: Vec<&str> = if guarded { vec!["initializer"] } else { Vec::new() };
        let contract = |types: &[&'static str], version: &str| {
            let storage: Vec<_> = named(types)
                .into_iter()
                .map(|(name, ty)| json!({"name": name, "type": ty}))
                .chain(std::iter::once(json!({"name": "owner", "type": "address"})))
                .collect();
            json!({
                "name": "Vault",
                "version": version,
                "is_proxy_implementation": true,
                "storage": storage,
                "functions": [{
                    "name": "initialize", "visibility": "external",
                    "parameters": [{"name": "_owner", "type": "address"}],
                    "modifiers": modifiers,
                    "body": [{"kind": "assign", "target": {"kind": "identifier", "name": "owner"},
                              "value": {"kind": "identifier", "name": "_owner"}}]
                }]
            })
            .to_string()
        };

        let engine = ScanningEngine::default();
        let (old, _) = engine.load_source("old.json", &contract(&old, "1"));
        let (new, _) = engine.load_source("new.json", &contract(&new, "2"));
        let targets = AnalysisTarget::pair(old, new);

        let first = engine.run(&targets);
        let second = engine.run(&targets);
        prop_assert_eq!(first.findings(), second.findings());
        prop_assert!(!first.is_empty());
    }
}
