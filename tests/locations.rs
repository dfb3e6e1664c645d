mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::time::Duration;

use idseq_cli::config::Aliases;
use idseq_cli::domain::{MetadataRecord, MetadataValue};
use idseq_cli::locations::{
    EnricherOptions, GeoEnricher, RetryPolicy, apply_location_matches, location_summary,
    raw_locations,
};

use common::{MockApi, ScriptedInteraction, location};

fn options(accept_all: bool) -> EnricherOptions {
    EnricherOptions {
        accept_all,
        workers: 5,
        retry: RetryPolicy::immediate(3),
    }
}

fn queries(values: &[&str]) -> BTreeSet<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn resolves_every_query_once() {
    let mut api = MockApi::default();
    api.locations
        .insert("Berkeley".to_string(), location("Berkeley, California, USA", "city"));
    api.locations
        .insert("Kenya".to_string(), location("Kenya", "country"));
    let interaction = ScriptedInteraction::default();

    let enricher = GeoEnricher::new(&api, &interaction, options(true));
    let matches = enricher.resolve(&queries(&["Berkeley", "Kenya", "Nowhere"]));

    assert_eq!(matches.len(), 2);
    assert_eq!(matches["Berkeley"].name, "Berkeley, California, USA");
    assert!(!matches.contains_key("Nowhere"));
    let mut searched = api.search_calls.lock().unwrap().clone();
    searched.sort();
    assert_eq!(searched, vec!["Berkeley", "Kenya", "Nowhere"]);
}

#[test]
fn lookups_run_in_parallel_but_never_more_than_five_at_once() {
    let api = MockApi {
        search_delay: Some(Duration::from_millis(25)),
        ..MockApi::default()
    };
    let interaction = ScriptedInteraction::default();
    let many: BTreeSet<String> = (0..20).map(|i| format!("Place {i}")).collect();

    let enricher = GeoEnricher::new(
        &api,
        &interaction,
        EnricherOptions {
            workers: 32,
            ..options(true)
        },
    );
    enricher.resolve(&many);

    let peak = api.peak_searches_in_flight.load(Ordering::SeqCst);
    assert!(peak > 1, "lookups never overlapped");
    assert!(peak <= 5, "{peak} lookups ran at once");
    assert_eq!(api.search_calls.lock().unwrap().len(), 20);
}

#[test]
fn persistent_failure_is_retried_then_left_as_text() {
    let mut api = MockApi::default();
    api.failing_locations.insert("Atlantis".to_string());
    let interaction = ScriptedInteraction::default();

    let enricher = GeoEnricher::new(&api, &interaction, options(true));
    let matches = enricher.resolve(&queries(&["Atlantis"]));

    assert!(matches.is_empty());
    assert_eq!(api.search_calls.lock().unwrap().len(), 3);
    assert!(interaction.notices().contains("Error finding location match for: 'Atlantis'"));
}

#[test]
fn rejected_match_is_dropped_and_identical_match_is_not_asked() {
    let mut api = MockApi::default();
    api.locations
        .insert("SF".to_string(), location("San Francisco, California, USA", "city"));
    api.locations
        .insert("Kenya".to_string(), location("Kenya", "country"));
    let interaction = ScriptedInteraction::confirming(&[false]);

    let enricher = GeoEnricher::new(&api, &interaction, options(false));
    let matches = enricher.resolve(&queries(&["Kenya", "SF"]));

    assert_eq!(matches.keys().collect::<Vec<_>>(), vec!["Kenya"]);
    let questions = interaction.questions.lock().unwrap();
    assert_eq!(questions.len(), 1);
    assert!(questions[0].contains("San Francisco"));
}

#[test]
fn unanswerable_confirmation_counts_as_rejection() {
    let mut api = MockApi::default();
    api.locations
        .insert("SF".to_string(), location("San Francisco, California, USA", "city"));
    let interaction = ScriptedInteraction::default();

    let enricher = GeoEnricher::new(&api, &interaction, options(false));
    let matches = enricher.resolve(&queries(&["SF"]));

    assert!(matches.is_empty());
}

#[test]
fn human_samples_get_widened_locations() {
    let mut berkeley = location("Berkeley, Alameda County, California, USA", "city");
    berkeley.subdivision_name = Some("Alameda County".to_string());
    berkeley.state_name = Some("California".to_string());
    berkeley.country_name = Some("USA".to_string());
    let mut matches = BTreeMap::new();
    matches.insert("Berkeley".to_string(), berkeley);

    let aliases = Aliases::default();
    let mut records = BTreeMap::new();
    for (sample, host) in [("patient", "Human"), ("mosquito", "Mosquito")] {
        let mut record = MetadataRecord::new();
        record.insert_text("Collection Location", "Berkeley");
        record.insert_text("Host Organism", host);
        records.insert(sample.to_string(), record);
    }
    let mut unresolved = MetadataRecord::new();
    unresolved.insert_text("collection_location", "Atlantis");
    records.insert("lost".to_string(), unresolved);

    assert_eq!(
        raw_locations(&records, &aliases),
        queries(&["Atlantis", "Berkeley"])
    );
    apply_location_matches(&mut records, &matches, &aliases);

    let shown = |sample: &str| match records[sample].get("Collection Location") {
        Some(MetadataValue::Location(found)) => found.name.clone(),
        other => panic!("expected resolved location, got {other:?}"),
    };
    assert_eq!(shown("patient"), "Alameda County, California, USA");
    assert_eq!(shown("mosquito"), "Berkeley, Alameda County, California, USA");
    assert_eq!(
        records["lost"].get("collection_location"),
        Some(&MetadataValue::Text("Atlantis".to_string()))
    );

    let summary = location_summary(&records, &aliases, "https://idseq.net", 7);
    assert!(summary.contains("Alameda County, California, USA (!)"));
    assert!(summary.contains("Atlantis *"));
    assert!(summary.contains("https://idseq.net/my_data?projectId=7"));
}
