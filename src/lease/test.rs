use super::*;

fn resources(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_acquire_is_all_or_nothing() {
    let provider = LocalLeaseProvider::new();
    let mut other = LeaseSet::new(provider.clone(), "other");
    other.acquire_all(&resources(&["ptz"])).unwrap();

    let mut mine = LeaseSet::new(provider.clone(), "me");
    assert_eq!(
        mine.acquire_all(&resources(&["body", "ptz"])),
        Err(LeaseError::Unavailable {
            resource: "ptz".to_owned(),
            holder: "other".to_owned(),
        })
    );
    assert_eq!(mine.held().count(), 0);
    assert_eq!(provider.holder("body"), None);

    other.release_all();
    mine.acquire_all(&resources(&["body", "ptz"])).unwrap();
    assert_eq!(mine.held().collect::<Vec<_>>(), vec!["body", "ptz"]);
}

#[test]
fn test_retain_reacquires_revoked() {
    let provider = LocalLeaseProvider::new();
    let mut set = LeaseSet::new(provider.clone(), "me");
    set.acquire_all(&resources(&["body"])).unwrap();

    provider.revoke("body");
    assert_eq!(set.retain_all(), Ok(vec![]));
    assert!(set.is_held("body"));
    assert_eq!(provider.holder("body").as_deref(), Some("me"));
}

#[test]
fn test_retain_reports_lost_lease() {
    let provider = LocalLeaseProvider::new();
    let mut set = LeaseSet::new(provider.clone(), "me");
    set.acquire_all(&resources(&["body"])).unwrap();

    provider.revoke("body");
    let mut thief = LeaseSet::new(provider.clone(), "thief");
    thief.acquire_all(&resources(&["body"])).unwrap();

    let failures = set.retain_all().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(!set.is_held("body"));
    assert_eq!(set.missing(&resources(&["body"])), vec!["body"]);
}

#[test]
fn test_drop_releases() {
    let provider = LocalLeaseProvider::new();
    {
        let mut set = LeaseSet::new(provider.clone(), "me");
        set.acquire_all(&resources(&["body"])).unwrap();
    }
    assert_eq!(provider.holder("body"), None);
}
