//! Notify-set computation: which venues a recipient wants to hear about.

use std::collections::BTreeSet;
use tablewatch_core::domain::normalize_venue_name;

/// Default recipient id. Push tokens are account-scoped rather than
/// per-recipient (see [`tablewatch_store::NotifyStore::list_push_tokens`]),
/// so this crate fans out to a single household recipient; a multi-tenant
/// recipient directory is out of scope.
pub const DEFAULT_RECIPIENT_ID: &str = "default";

/// Venues every recipient is notified about regardless of preference,
/// normalized the same way `venue_name` is normalized on ingestion.
fn builtin_hotlist() -> &'static [&'static str] {
    &[
        "le bernardin",
        "carbone",
        "rezdora",
        "don angie",
        "torrisi",
    ]
}

/// Computes `(hotlist ∪ includes) − excludes`, all in normalized form.
#[must_use]
pub fn compute_notify_set(includes: &BTreeSet<String>, excludes: &BTreeSet<String>) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = builtin_hotlist().iter().map(|s| (*s).to_string()).collect();
    set.extend(includes.iter().cloned());
    for excluded in excludes {
        set.remove(excluded);
    }
    set
}

/// Whether `venue_name` matches the notify set: exact match after
/// normalization, or a substring match in either direction (so "Carbone"
/// matches a notify-set entry of "carbone nyc" and vice versa).
#[must_use]
pub fn matches_notify_set(venue_name: &str, notify_set: &BTreeSet<String>) -> bool {
    let normalized = normalize_venue_name(venue_name);
    notify_set
        .iter()
        .any(|entry| normalized.contains(entry.as_str()) || entry.contains(normalized.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotlist_is_always_included() {
        let set = compute_notify_set(&BTreeSet::new(), &BTreeSet::new());
        assert!(set.contains("carbone"));
    }

    #[test]
    fn exclude_removes_a_hotlist_entry() {
        let mut excludes = BTreeSet::new();
        excludes.insert("carbone".to_string());
        let set = compute_notify_set(&BTreeSet::new(), &excludes);
        assert!(!set.contains("carbone"));
    }

    #[test]
    fn include_adds_beyond_the_hotlist() {
        let mut includes = BTreeSet::new();
        includes.insert("lilia".to_string());
        let set = compute_notify_set(&includes, &BTreeSet::new());
        assert!(set.contains("lilia"));
    }

    #[test]
    fn substring_match_is_bidirectional() {
        let mut set = BTreeSet::new();
        set.insert("carbone".to_string());
        assert!(matches_notify_set("Carbone NYC", &set));

        let mut set2 = BTreeSet::new();
        set2.insert("carbone nyc".to_string());
        assert!(matches_notify_set("Carbone", &set2));
    }

    #[test]
    fn unrelated_venue_does_not_match() {
        let mut set = BTreeSet::new();
        set.insert("carbone".to_string());
        assert!(!matches_notify_set("Olive Garden", &set));
    }
}
