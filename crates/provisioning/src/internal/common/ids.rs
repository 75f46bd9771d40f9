use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// Identifies one instance of a deployed application, `tenant.application.instance`.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId {
    tenant: String,
    application: String,
    instance: String,
}

impl ApplicationId {
    pub fn new(
        tenant: impl Into<String>,
        application: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            application: application.into(),
            instance: instance.into(),
        }
    }

    #[inline]
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    #[inline]
    pub fn application(&self) -> &str {
        &self.application
    }

    #[inline]
    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl Display for ApplicationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.tenant, self.application, self.instance)
    }
}

impl Debug for ApplicationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Cloud account owning a host. The empty account means "unspecified", i.e. the zone default.
#[derive(Default, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloudAccount(String);

impl CloudAccount {
    pub const fn unspecified() -> Self {
        CloudAccount(String::new())
    }

    pub fn new(account: impl Into<String>) -> Self {
        CloudAccount(account.into())
    }

    pub fn is_unspecified(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CloudAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_unspecified() {
            f.write_str("unspecified")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl Debug for CloudAccount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Who initiated a change to a node.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Application,
    System,
    Operator,
}
