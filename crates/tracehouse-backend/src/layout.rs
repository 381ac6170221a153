//! Object Store Layout
//!
//! Every object lives under `tenant/<tenantID>/<blockUUID>/<name>`. Listing
//! at `tenant/` yields tenant IDs; listing at `tenant/<id>/` yields block
//! UUIDs. A [`KeyPath`] is the ordered list of path segments above the
//! object name; [`object_file_name`] is the canonical `/` join.

use uuid::Uuid;

/// Ordered path segments addressing a "directory" in the store.
pub type KeyPath = Vec<String>;

/// Root prefix under which all tenants live.
pub const TENANTS_PREFIX: &str = "tenant";

/// Object names within one block.
pub const DATA_OBJECT: &str = "data";
pub const INDEX_OBJECT: &str = "index";
pub const META_OBJECT: &str = "meta";

/// Canonical join of a keypath and an object name.
pub fn object_file_name(keypath: &[String], name: &str) -> String {
    let mut parts: Vec<&str> = keypath.iter().map(|s| s.as_str()).collect();
    parts.push(name);
    parts.join("/")
}

/// Keypath listing all tenants.
pub fn tenants_keypath() -> KeyPath {
    vec![TENANTS_PREFIX.to_string()]
}

/// Keypath of one tenant's block set.
pub fn tenant_keypath(tenant_id: &str) -> KeyPath {
    vec![TENANTS_PREFIX.to_string(), tenant_id.to_string()]
}

/// Keypath of one block's objects.
pub fn block_keypath(tenant_id: &str, block_id: &Uuid) -> KeyPath {
    vec![
        TENANTS_PREFIX.to_string(),
        tenant_id.to_string(),
        block_id.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_file_name_joins_with_slash() {
        let keypath = tenant_keypath("acme");
        assert_eq!(object_file_name(&keypath, "meta"), "tenant/acme/meta");
        assert_eq!(object_file_name(&[], "meta"), "meta");
    }

    #[test]
    fn test_block_keypath_shape() {
        let id = Uuid::nil();
        let keypath = block_keypath("acme", &id);
        assert_eq!(
            object_file_name(&keypath, DATA_OBJECT),
            format!("tenant/acme/{}/data", id)
        );
    }
}
