//! Page controllers, one module per group of pages.

pub mod account;
pub mod delivery;
pub mod password;
pub mod users;

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::portal::backend::testing::ScriptedBackend;
    use crate::portal::identity::MemoryIdentityPool;
    use crate::portal::session::{self, SessionContext};
    use crate::portal::Portal;
    use std::sync::Arc;

    pub const PASSWORD: &str = "Passw0rd!";

    pub struct Harness {
        pub pool: Arc<MemoryIdentityPool>,
        pub backend: Arc<ScriptedBackend>,
        pub portal: Portal,
        pub ctx: SessionContext,
    }

    pub fn harness() -> Harness {
        let pool = Arc::new(MemoryIdentityPool::new());
        let backend = Arc::new(ScriptedBackend::new());
        let portal = Portal::new(pool.clone(), backend.clone());
        Harness {
            pool,
            backend,
            portal,
            ctx: SessionContext::in_memory(),
        }
    }

    /// Harness with a signed-in restaurant account.
    pub fn signed_in() -> Harness {
        let h = harness();
        h.ctx.session.set(session::ACCESS_TOKEN, "tok-1");
        h.ctx.session.set(session::USERNAME, "cafe");
        h
    }
}
