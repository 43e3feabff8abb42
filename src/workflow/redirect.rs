//! Post-login redirect targets are confined to local paths.

/// Accept only absolute paths within this origin. Protocol-relative (`//`)
/// and backslash (`/\`) forms are rejected since browsers treat them as
/// cross-origin jumps.
pub(crate) fn is_local_path(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    if chars.next() != Some('/') {
        return false;
    }
    if matches!(chars.next(), Some('/' | '\\')) {
        return false;
    }
    !candidate.chars().any(|ch| ch.is_ascii_control())
}

/// Pick the redirect target for a finished sign-in.
pub(crate) fn resolve_return_to(return_to: Option<&str>, default_landing: &str) -> String {
    match return_to {
        Some(candidate) if is_local_path(candidate) => candidate.to_string(),
        _ => default_landing.to_string(),
    }
}
