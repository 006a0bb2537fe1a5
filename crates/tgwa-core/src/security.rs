// ============== Authorization ==============

/// Operator commands are restricted to the configured admin ids.
///
/// An empty admin list authorizes nobody.
pub fn is_authorized(user_id: Option<i64>, admin_ids: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if admin_ids.is_empty() {
        return false;
    }
    admin_ids.contains(&user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_listed_admins_are_authorized() {
        let admins = [42, 7];
        assert!(is_authorized(Some(42), &admins));
        assert!(!is_authorized(Some(1), &admins));
        assert!(!is_authorized(None, &admins));
    }

    #[test]
    fn empty_admin_list_authorizes_nobody() {
        assert!(!is_authorized(Some(42), &[]));
    }
}
