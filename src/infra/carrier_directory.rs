use async_trait::async_trait;
use std::collections::HashSet;

use crate::app::ports::CarrierLookupPort;

/// Carrier codes known from configuration.
#[derive(Debug, Clone, Default)]
pub struct CarrierDirectory {
    codes: HashSet<String>,
}

fn canonical(code: &str) -> String {
    code.trim().to_uppercase().replace([' ', '-'], "_")
}

impl CarrierDirectory {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            codes: codes.into_iter().map(|c| canonical(c.as_ref())).collect(),
        }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(&canonical(code))
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[async_trait]
impl CarrierLookupPort for CarrierDirectory {
    async fn recognize(&self, codes: &[String]) -> Result<HashSet<String>, String> {
        Ok(codes.iter().filter(|c| self.contains(c)).cloned().collect())
    }
}
