use std::path::Path;

use crate::{fetcher::parse_rootfs_url, rootfs::IdMapping, ShedError, ShedResult};

use super::ShedConfig;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ShedConfig {
    /// Checks the configuration, reporting every problem found.
    ///
    /// Roots must be absolute paths. Id mappings must be non-empty and must not run past the
    /// end of the id space. Persistent images must be valid rootfs URLs.
    pub fn validate(&self) -> ShedResult<()> {
        let mut errors = Vec::new();

        validate_absolute("graph_root", &self.graph_root, &mut errors);
        if let Some(root) = &self.backing_store_root {
            validate_absolute("backing_store_root", root, &mut errors);
        }
        if let Some(rootfs) = &self.default_rootfs {
            validate_absolute("default_rootfs", rootfs, &mut errors);
        }

        validate_mappings("uid_mappings", &self.uid_mappings, &mut errors);
        validate_mappings("gid_mappings", &self.gid_mappings, &mut errors);

        if self.default_registry_host.is_empty() {
            errors.push("default_registry_host must not be empty".to_string());
        }

        for image in &self.persistent_images {
            if let Err(err) = parse_rootfs_url(image) {
                errors.push(format!("persistent image '{image}': {err}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ShedError::Configuration(errors.join("; ")))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn validate_absolute(field: &str, path: &Path, errors: &mut Vec<String>) {
    if !path.is_absolute() {
        errors.push(format!("{field} must be absolute: {}", path.display()));
    }
}

fn validate_mappings(field: &str, mappings: &[IdMapping], errors: &mut Vec<String>) {
    let limit = u64::from(u32::MAX) + 1;

    for mapping in mappings {
        if mapping.size == 0 {
            errors.push(format!("{field}: empty mapping {mapping}"));
            continue;
        }

        let size = u64::from(mapping.size);
        if u64::from(mapping.container_id) + size > limit || u64::from(mapping.host_id) + size > limit
        {
            errors.push(format!("{field}: mapping {mapping} overflows the id space"));
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
