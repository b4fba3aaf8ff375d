use log::{debug, info};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::directive::RouteSpec;
use crate::models::{HttpMethod, Operation, PathItem};
use crate::store::{SchemaRegistry, Store};

/// Puts `operation` into the slot of its route. Routes with an unknown verb
/// are dropped without creating the path item.
pub fn add_operation(store: &mut Store, route: &RouteSpec, operation: Operation) -> bool {
    let Some(method) = route.http_method() else {
        debug!("Dropping {} {}: unsupported method", route.method, route.path);
        return false;
    };
    let item = store.paths.entry(route.path.clone()).or_default();
    *item.slot_mut(method) = Some(operation);
    true
}

/// Global passes run once after every declaration was parsed.
pub fn finalize(store: &mut Store, config: &Config) {
    if !config.schema_without_pkg {
        prune_short_keys(&mut store.registry);
    }
    if let Some(tag) = config.filter_tag() {
        filter_paths_by_tag(&mut store.paths, tag);
    }
}

/// Removes the short-name aliases of every package-qualified schema.
pub fn prune_short_keys(registry: &mut SchemaRegistry) {
    let short_keys: Vec<String> = registry
        .ids()
        .filter(|id| id.contains('.'))
        .filter_map(|id| id.rsplit('.').next())
        .map(str::to_string)
        .collect();

    for key in short_keys {
        if registry.remove(&key).is_some() {
            debug!("Pruned short schema key {}", key);
        }
    }
}

/// Keeps only operations tagged `tag`; path items left empty are removed.
pub fn filter_paths_by_tag(paths: &mut BTreeMap<String, PathItem>, tag: &str) {
    let mut filtered = BTreeMap::new();

    for (path, item) in std::mem::take(paths) {
        let mut kept = PathItem {
            ref_: item.ref_.clone(),
            summary: item.summary.clone(),
            description: item.description.clone(),
            ..Default::default()
        };
        let mut matched = false;
        for method in HttpMethod::ALL {
            if let Some(operation) = item.slot(method).filter(|op| op.has_tag(tag)) {
                *kept.slot_mut(method) = Some(operation.clone());
                matched = true;
            }
        }
        if matched {
            filtered.insert(path, kept);
        }
    }

    info!("Filtered paths by tag '{}', {} paths remaining", tag, filtered.len());
    *paths = filtered;
}
