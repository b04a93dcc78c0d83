//! Version publishing and alias rebinding.

use crate::context::DeployContext;
use crate::error::Result;
use controlplane::AliasRecord;

/// Alias bound to a freshly published version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasBinding {
    pub version: String,
    pub alias: AliasRecord,
}

/// Publishes immutable versions and re-points a named alias at them.
///
/// The delete/publish/create sequence is not atomic. A crash between delete
/// and create leaves the alias unbound until the next run, which is safe
/// since a missing alias is tolerated on delete.
pub struct VersionAliasPublisher<'a> {
    ctx: DeployContext<'a>,
}

impl<'a> VersionAliasPublisher<'a> {
    pub fn new(ctx: DeployContext<'a>) -> Self {
        Self { ctx }
    }

    /// Publish the code stored under `function` and bind `alias` to it.
    ///
    /// A checksum mismatch on publish is returned as an error.
    pub fn publish(&self, function: &str, alias: &str, code_checksum: &str) -> Result<AliasBinding> {
        self.unbind(function, alias)?;

        let version = self
            .ctx
            .call(|p| p.publish_version(function, code_checksum))?;
        log::info!("Published {function} version {version}");

        let record = match self.ctx.call(|p| p.create_alias(function, alias, &version)) {
            Ok(record) => record,
            Err(e) if e.is_already_exists() => {
                // Another writer rebound the alias in between; last writer wins
                self.unbind(function, alias)?;
                self.ctx.call(|p| p.create_alias(function, alias, &version))?
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("Alias {function}:{alias} -> {version}");

        Ok(AliasBinding {
            version,
            alias: record,
        })
    }

    fn unbind(&self, function: &str, alias: &str) -> Result<()> {
        match self.ctx.call(|p| p.delete_alias(function, alias)) {
            Ok(()) => {
                log::debug!("Deleted alias {function}:{alias}");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
