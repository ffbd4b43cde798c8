//! Source identity of an exporter run.

use std::fmt;

use crate::error::{AppError, Result};

/// Account and region an exporter run speaks for.
///
/// Every written entity is stamped with this identity through the
/// `User-Agent`, and the reaper only considers entities carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub account_id: String,
    pub region: String,
}

impl SourceIdentity {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
        }
    }

    /// Parse `arn:aws:lambda:<region>:<account>:function:<name>`.
    pub fn from_function_arn(arn: &str) -> Result<Self> {
        let parts: Vec<&str> = arn.split(':').collect();
        match parts.as_slice() {
            ["arn", _, _, region, account, ..] if !region.is_empty() && !account.is_empty() => {
                Ok(Self::new(*account, *region))
            }
            _ => Err(AppError::config(format!("Malformed function ARN: {arn}"))),
        }
    }

    /// Datasource marker shared by the user agent and reaper filter.
    pub fn user_id(&self) -> String {
        format!("accountid/{} region/{}", self.account_id, self.region)
    }

    pub fn user_agent(&self, exporter_name: &str) -> String {
        format!("{exporter_name}/0.1 ({})", self.user_id())
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_function_arn() {
        let identity = SourceIdentity::from_function_arn(
            "arn:aws:lambda:eu-west-1:123456789012:function:exporter",
        )
        .unwrap();

        assert_eq!(identity, SourceIdentity::new("123456789012", "eu-west-1"));
        assert_eq!(identity.user_id(), "accountid/123456789012 region/eu-west-1");
        assert_eq!(
            identity.user_agent("port-aws-exporter"),
            "port-aws-exporter/0.1 (accountid/123456789012 region/eu-west-1)"
        );
    }

    #[test]
    fn test_rejects_malformed_arn() {
        assert!(SourceIdentity::from_function_arn("exporter").is_err());
        assert!(SourceIdentity::from_function_arn("arn:aws:lambda::").is_err());
    }
}
