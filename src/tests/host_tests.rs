use super::*;
use proptest::prelude::*;

#[test]
fn test_wildcard_matches_extension() {
    let re = wildcard_regex("*.json").unwrap();
    assert!(re.is_match("rules.json"));
    assert!(!re.is_match("rules.json.bak"));
    assert!(!re.is_match("rules.yaml"));
}

#[test]
fn test_wildcard_escapes_regex_metacharacters() {
    let re = wildcard_regex("lintd-(1).?").unwrap();
    assert!(re.is_match("lintd-(1).x"));
    assert!(!re.is_match("lintd-1.x"));
}

#[test]
fn test_find_entries_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    std::fs::create_dir(&plugins).unwrap();
    std::fs::write(plugins.join("b.json"), "{}").unwrap();
    std::fs::write(plugins.join("a.json"), "{}").unwrap();
    std::fs::write(plugins.join("notes.txt"), "").unwrap();
    std::fs::create_dir(plugins.join("nested.json")).unwrap();

    let host = BundleHost::new(dir.path());
    let entries = host.find_entries("/plugins", "*.json").unwrap();

    let names: Vec<_> = entries
        .iter()
        .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["a.json", "b.json"]);
    assert!(entries.iter().all(|p| p.is_absolute()));
}

#[test]
fn test_find_entries_missing_directory_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let host = BundleHost::new(dir.path());
    assert!(host.find_entries("/daemon", "*").unwrap().is_empty());
}

#[test]
fn test_runtime_executable_defaults_to_none() {
    let host = BundleHost::new("/opt/bundle");
    assert!(host.runtime_executable().unwrap().is_none());

    let host = host.with_runtime("/usr/bin/env");
    assert_eq!(host.root(), Path::new("/opt/bundle"));
    assert_eq!(
        host.runtime_executable().unwrap(),
        Some(PathBuf::from("/usr/bin/env"))
    );
}

proptest! {
    #[test]
    fn prop_literal_pattern_matches_only_itself(name in "[a-zA-Z0-9._+()-]{1,16}") {
        let re = wildcard_regex(&name).unwrap();
        prop_assert!(re.is_match(&name));
        let longer = format!("{}x", name);
        prop_assert!(!re.is_match(&longer));
    }
}
