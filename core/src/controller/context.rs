/// Request-scoped caller identity
///
/// Whatever fronts the controllers (HTTP layer, CLI) resolves the caller and
/// passes it in; nothing here reads ambient state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    user_id: Option<i64>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }
}
