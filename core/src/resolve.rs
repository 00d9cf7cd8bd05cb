//! Base URL + URI template + path parameters → absolute URL.

use std::collections::HashMap;

use url::Url;

use crate::error::Result;
use crate::uritemplate;

/// Resolve `template`, expanded with `params`, against `base`.
///
/// The raw (unescaped) expansion is parsed as a URL reference, so the URL
/// parser performs the only encoding pass. The reference follows standard
/// relative resolution: an absolute reference replaces the base entirely,
/// an absolute path replaces the base path, a relative path extends it.
pub fn resolve_url(base: &str, template: &str, params: &HashMap<String, String>) -> Result<Url> {
    let base = Url::parse(base)?;
    let expansion = uritemplate::expand(template, params)?;
    Ok(base.join(&expansion.unescaped)?)
}
