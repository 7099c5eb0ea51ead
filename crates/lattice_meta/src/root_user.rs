//! Root-user bootstrap. Runs on the meta leader after the cluster id is
//! settled; followers do nothing.

use tracing::info;

use crate::service::MetaService;

pub const ROOT_ACCOUNT: &str = "root";
const ROOT_DEFAULT_PASSWORD: &str = "lattice";

/// Install the default root user if no record exists yet. Returns false on
/// a failed write; an existing record is success.
pub async fn ensure_root_user(service: &MetaService) -> bool {
    match service.user_exists(ROOT_ACCOUNT) {
        Ok(true) => return true,
        Ok(false) => {}
        Err(code) => {
            tracing::error!(%code, "root user lookup failed");
            return false;
        }
    }

    info!("root user missing, installing default");
    let code = service
        .create_user(ROOT_ACCOUNT, ROOT_DEFAULT_PASSWORD, true)
        .await;
    if !code.ok() {
        tracing::error!(%code, "root user install failed");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use lattice_common::HostAddr;
    use lattice_kv::{LatticeStore, ReplicaFabric, StoreOptions};
    use std::sync::Arc;

    fn service() -> MetaService {
        let store = LatticeStore::in_memory(
            StoreOptions {
                local: HostAddr::new("meta1", 45500),
                check_leader: false,
            },
            ReplicaFabric::new(),
        );
        store
            .add_part(
                keys::META_SPACE_ID,
                keys::META_PART_ID,
                &[HostAddr::new("meta1", 45500)],
            )
            .unwrap();
        MetaService::new(store, 1)
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let svc = service();
        assert!(!svc.user_exists(ROOT_ACCOUNT).unwrap());
        assert!(ensure_root_user(&svc).await);
        assert!(svc.user_exists(ROOT_ACCOUNT).unwrap());
        // Second run keeps the existing record.
        assert!(ensure_root_user(&svc).await);
    }
}
