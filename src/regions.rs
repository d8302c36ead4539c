use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{ModelSpec, Provider};

/// Regions tried first, in this order, whenever the model serves them.
pub const PRIORITY_REGIONS: &[&str] = &["us-east5", "us-central1", "europe-west1"];

/// Discovery cache entries older than this fall back to the static catalog.
const DISCOVERY_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Optional on-disk map of canonical model id -> regions confirmed to serve
/// it, produced by the external discovery probe.
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryCache {
    #[serde(flatten)]
    pub regions: HashMap<String, Vec<String>>,
}

pub fn discovery_path() -> PathBuf {
    Config::dir().join("regions.json")
}

/// Load the discovery cache if present and fresh.
pub fn load_discovery() -> Option<DiscoveryCache> {
    let path = discovery_path();
    let meta = std::fs::metadata(&path).ok()?;
    let age = meta
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())?;
    if age > DISCOVERY_MAX_AGE {
        debug!(path = %path.display(), age_secs = age.as_secs(), "Discovery cache stale, ignoring");
        return None;
    }
    let data = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&data) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unparseable discovery cache, ignoring");
            None
        }
    }
}

/// Produce the ordered, non-empty list of regions to try for a model.
///
/// Source set: fresh discovery data if it lists the model, else the catalog
/// spec, else a provider default. The set is then re-ordered so that the
/// global priority regions come first (in priority order), with the rest in
/// their original order.
pub fn plan(
    canonical: &str,
    spec: Option<&ModelSpec>,
    provider: Provider,
    discovery: Option<&DiscoveryCache>,
    config: &Config,
) -> Vec<String> {
    let discovered = discovery.and_then(|d| d.regions.get(canonical)).cloned();

    let base: Vec<String> = if let Some(regions) = discovered {
        regions
    } else if let Some(spec) = spec {
        spec.regions.iter().map(|r| r.to_string()).collect()
    } else {
        // Uncataloged models: provider default first, then the rest of the
        // priority list.
        let default = match provider {
            Provider::Anthropic | Provider::Imagen => config.default_region.clone(),
            Provider::Google => config.google_region.clone(),
        };
        let mut regions = vec![default];
        for r in PRIORITY_REGIONS {
            if !regions.iter().any(|x| x == r) {
                regions.push(r.to_string());
            }
        }
        regions
    };

    prioritize(base)
}

fn prioritize(regions: Vec<String>) -> Vec<String> {
    let mut ordered = Vec::with_capacity(regions.len());
    for p in PRIORITY_REGIONS {
        if regions.iter().any(|r| r == p) {
            ordered.push(p.to_string());
        }
    }
    for r in regions {
        if !ordered.contains(&r) {
            ordered.push(r);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog_get;

    #[test]
    fn test_priority_reorder() {
        let ordered = prioritize(vec![
            "asia-east1".to_string(),
            "europe-west1".to_string(),
            "us-east5".to_string(),
        ]);
        assert_eq!(ordered, vec!["us-east5", "europe-west1", "asia-east1"]);
    }

    #[test]
    fn test_non_priority_keep_original_order() {
        let ordered = prioritize(vec![
            "asia-southeast1".to_string(),
            "asia-east1".to_string(),
        ]);
        assert_eq!(ordered, vec!["asia-southeast1", "asia-east1"]);
    }

    #[test]
    fn test_plan_from_catalog() {
        let config = Config::default();
        let spec = catalog_get("claude-sonnet-4-5@20250929");
        let plan = plan(
            "claude-sonnet-4-5@20250929",
            spec,
            Provider::Anthropic,
            None,
            &config,
        );
        assert!(!plan.is_empty());
        assert_eq!(plan[0], "us-east5");
        assert!(plan.contains(&"asia-east1".to_string()));
    }

    #[test]
    fn test_plan_unknown_model_nonempty() {
        let config = Config::default();
        let plan = plan("mystery-model", None, Provider::Anthropic, None, &config);
        assert!(!plan.is_empty());
        // Provider default region appears, priority regions follow.
        assert!(plan.contains(&"us-east5".to_string()));
        assert!(plan.contains(&"us-central1".to_string()));
    }

    #[test]
    fn test_plan_google_global() {
        let config = Config::default();
        let spec = catalog_get("gemini-2.5-flash");
        let plan = plan("gemini-2.5-flash", spec, Provider::Google, None, &config);
        assert_eq!(plan, vec!["global"]);
    }

    #[test]
    fn test_discovery_overrides_catalog() {
        let config = Config::default();
        let mut discovery = DiscoveryCache::default();
        discovery.regions.insert(
            "claude-sonnet-4-5@20250929".to_string(),
            vec!["asia-east1".to_string(), "us-central1".to_string()],
        );
        let spec = catalog_get("claude-sonnet-4-5@20250929");
        let plan = plan(
            "claude-sonnet-4-5@20250929",
            spec,
            Provider::Anthropic,
            Some(&discovery),
            &config,
        );
        // Discovered set only, with priority regions pulled to the front.
        assert_eq!(plan, vec!["us-central1", "asia-east1"]);
    }

    #[test]
    fn test_discovery_without_model_falls_back() {
        let config = Config::default();
        let discovery = DiscoveryCache::default();
        let spec = catalog_get("gemini-2.0-flash");
        let plan = plan(
            "gemini-2.0-flash",
            spec,
            Provider::Google,
            Some(&discovery),
            &config,
        );
        assert_eq!(plan, vec!["us-central1", "europe-west1"]);
    }
}
