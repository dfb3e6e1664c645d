//! Collection-location geosearch.
//!
//! Raw location strings from the metadata are resolved against the service's
//! external search on a small worker pool. Lookups that keep failing, and
//! matches the operator rejects, stay as plain text.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use rand::Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::api::IdseqApi;
use crate::config::Aliases;
use crate::domain::{LocationMatch, MetadataRecord, MetadataValue};
use crate::prompt::Interaction;

pub const MAX_GEOSEARCH_ATTEMPTS: usize = 3;
pub const MAX_GEOSEARCH_WORKERS: usize = 5;

pub type LocationMatches = BTreeMap<String, LocationMatch>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_GEOSEARCH_ATTEMPTS,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(attempts: usize) -> Self {
        Self {
            attempts,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct EnricherOptions {
    pub accept_all: bool,
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for EnricherOptions {
    fn default() -> Self {
        Self {
            accept_all: false,
            workers: MAX_GEOSEARCH_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct GeoEnricher<'a, A: IdseqApi> {
    api: &'a A,
    interaction: &'a dyn Interaction,
    options: EnricherOptions,
}

impl<'a, A: IdseqApi> GeoEnricher<'a, A> {
    pub fn new(api: &'a A, interaction: &'a dyn Interaction, options: EnricherOptions) -> Self {
        Self {
            api,
            interaction,
            options,
        }
    }

    /// Never fails: unresolved or rejected queries are simply absent from the result.
    pub fn resolve(&self, queries: &BTreeSet<String>) -> LocationMatches {
        let mut matches = self.fetch_matches(queries);
        if !self.options.accept_all && !matches.is_empty() {
            self.confirm_matches(&mut matches);
        }
        matches
    }

    fn fetch_matches(&self, queries: &BTreeSet<String>) -> LocationMatches {
        let workers = self.options.workers.clamp(1, MAX_GEOSEARCH_WORKERS);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("idseq-geosearch-{i}"))
            .build();
        match pool {
            Ok(pool) => pool.install(|| {
                queries
                    .par_iter()
                    .filter_map(|query| self.lookup(query).map(|found| (query.clone(), found)))
                    .collect()
            }),
            Err(err) => {
                warn!(error = %err, "geosearch pool unavailable, searching sequentially");
                queries
                    .iter()
                    .filter_map(|query| self.lookup(query).map(|found| (query.clone(), found)))
                    .collect()
            }
        }
    }

    fn lookup(&self, query: &str) -> Option<LocationMatch> {
        let attempts = self.options.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.api.search_location(query) {
                Ok(found) => {
                    debug!(query, matched = found.is_some(), "geosearch");
                    return found;
                }
                Err(err) => {
                    warn!(query, attempt, error = %err, "geosearch attempt failed");
                    if attempt < attempts {
                        thread::sleep(self.options.retry.delay());
                    }
                }
            }
        }
        self.interaction.notify(&format!(
            "\nError finding location match for: '{query}'. Location will be saved as plain \
             text and not appear on IDseq maps.\n"
        ));
        None
    }

    fn confirm_matches(&self, matches: &mut LocationMatches) {
        self.interaction.notify(
            "\nConfirm Your Collection Locations\nWe automatically searched for location \
             matches. Please double check and correct any errors. If you reject a match, it \
             will be unresolved plain text and not shown on IDseq maps.",
        );
        matches.retain(|raw, found| {
            if *raw == found.name {
                return true;
            }
            let question = format!("\nWe matched \"{raw}\" to \"{}\"\nIs this correct?", found.name);
            match self.interaction.confirm(&question) {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(raw = %raw, error = %err, "no answer, rejecting location match");
                    false
                }
            }
        });
    }
}

/// Human samples never carry city-level locations: the city is dropped from the name.
/// `None` when nothing wider than the city is known, so the value stays plain text.
pub fn restrict_for_privacy(mut found: LocationMatch, is_human: bool) -> Option<LocationMatch> {
    if is_human && found.is_city() {
        let wider = [
            &found.subdivision_name,
            &found.state_name,
            &found.country_name,
        ]
        .into_iter()
        .flatten()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
        if wider.is_empty() {
            return None;
        }
        found.name = wider;
        found.restricted = true;
    }
    Some(found)
}

/// Distinct plain-text collection locations across all records.
pub fn raw_locations(records: &BTreeMap<String, MetadataRecord>, aliases: &Aliases) -> BTreeSet<String> {
    records
        .values()
        .filter_map(|record| record.find_text(&aliases.collection_location))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn apply_location_matches(
    records: &mut BTreeMap<String, MetadataRecord>,
    matches: &LocationMatches,
    aliases: &Aliases,
) {
    for record in records.values_mut() {
        let Some((field, raw)) = record
            .find(&aliases.collection_location)
            .and_then(|(field, value)| value.as_text().map(|raw| (field.to_string(), raw.trim().to_string())))
        else {
            continue;
        };
        let Some(found) = matches.get(&raw) else {
            continue;
        };
        let is_human = record
            .find_text(&aliases.host_genome)
            .map(|host| host.trim().eq_ignore_ascii_case("human"))
            .unwrap_or(false);
        match restrict_for_privacy(found.clone(), is_human) {
            Some(found) => record.insert(field, MetadataValue::Location(found)),
            None => warn!(%raw, "no location wider than the city, keeping plain text"),
        }
    }
}

/// The per-sample location table shown after enrichment.
pub fn location_summary(
    records: &BTreeMap<String, MetadataRecord>,
    aliases: &Aliases,
    base_url: &str,
    project_id: u64,
) -> String {
    let mut lines = vec![
        format!("\n{:30} | Collection Location", "Sample Name"),
        "-".repeat(60),
    ];
    let mut plain_text_found = false;
    let mut restricted_found = false;
    for (sample, record) in records {
        let Some((_, value)) = record.find(&aliases.collection_location) else {
            continue;
        };
        let shown = match value {
            MetadataValue::Location(found) if found.restricted => {
                restricted_found = true;
                format!("{} (!)", found.name)
            }
            MetadataValue::Location(found) => found.name.clone(),
            MetadataValue::Text(text) => {
                plain_text_found = true;
                format!("{text} *")
            }
        };
        lines.push(format!("{sample:30} | {shown}"));
    }
    if plain_text_found {
        lines.push("\n* Unresolved plain text location, not shown on maps.".to_string());
    }
    if restricted_found {
        lines.push("\n(!) Changed to county/district level for personal privacy.".to_string());
    }
    lines.push(format!(
        "\nTo make additional changes after uploading, go to the project page: \
         {base_url}/my_data?projectId={project_id} (and click Upload -> Upload Metadata)"
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn city() -> LocationMatch {
        LocationMatch {
            name: "Berkeley, Alameda County, California, USA".to_string(),
            geo_level: Some("city".to_string()),
            subdivision_name: Some("Alameda County".to_string()),
            state_name: Some("California".to_string()),
            country_name: Some("USA".to_string()),
            restricted: false,
            extra: Map::new(),
        }
    }

    #[test]
    fn human_city_is_widened() {
        let restricted = restrict_for_privacy(city(), true).unwrap();
        assert_eq!(restricted.name, "Alameda County, California, USA");
        assert!(restricted.restricted);
    }

    #[test]
    fn non_human_city_is_kept() {
        let kept = restrict_for_privacy(city(), false).unwrap();
        assert_eq!(kept.name, city().name);
        assert!(!kept.restricted);
    }

    #[test]
    fn human_city_without_wider_names_stays_plain_text() {
        let bare = LocationMatch {
            subdivision_name: None,
            state_name: Some(" ".to_string()),
            country_name: None,
            ..city()
        };
        assert!(restrict_for_privacy(bare.clone(), true).is_none());
        assert_eq!(restrict_for_privacy(bare, false).unwrap().name, city().name);
    }

    #[test]
    fn jittered_delay_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..20 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(2));
        }
    }
}
