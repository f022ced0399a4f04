use std::sync::Arc;

use httptest::matchers::{all_of, contains, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use parking_lot::Mutex;
use serde_json::json;
use tempfile::tempdir;

use location_resolver::{
    build_resolver, AppConfig, CancellationToken, LocationOutcome, ProgressObserver,
    ProgressPhase, ProgressState,
};

const CITIES_CSV: &str = r#""city","city_ascii","lat","lng","country","iso2","iso3","admin_name","capital","population","id"
"Tokyo","Tokyo","35.6897","139.6922","Japan","JP","JPN","Tōkyō","primary","37732000","1392685764"
"La Rochelle","La Rochelle","46.1591","-1.1517","France","FR","FRA","Nouvelle-Aquitaine","minor","77205","1250000001"
"New York","New York","40.6943","-73.9249","United States","US","USA","New York","","18972871","1840034016"
"Truncated","Row"
"#;

fn config_for(server: &Server, data_dir: &std::path::Path) -> AppConfig {
    AppConfig {
        gazetteer_source: server.url("/data/worldcities.csv").to_string(),
        geocoder_endpoint: server.url("/search").to_string(),
        geocoder_user_agent: "location-resolver-integration/1.0".into(),
        geocoder_min_interval_ms: 5,
        geocoder_timeout_secs: 5,
        data_dir: data_dir.to_path_buf(),
        cache_database_file_name: "integration.db".into(),
        cache_retention_days: 30,
        cache_max_entries: None,
    }
}

#[tokio::test]
async fn resolves_a_follower_batch_end_to_end() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/data/worldcities.csv"))
            .times(1)
            .respond_with(status_code(200).body(CITIES_CSV)),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/search"),
            request::query(url_decoded(contains(("q", "Reykjavik, Iceland")))),
            request::headers(contains(("user-agent", "location-resolver-integration/1.0"))),
        ])
        .times(1)
        .respond_with(json_encoded(json!([{
            "lat": "64.1459810",
            "lon": "-21.9422367",
            "display_name": "Reykjavík, Ísland"
        }]))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/search"),
            request::query(url_decoded(contains(("q", "the internet")))),
        ])
        .times(2)
        .respond_with(json_encoded(json!([]))),
    );

    let dir = tempdir().unwrap();
    let config = config_for(&server, dir.path());
    let resolver = build_resolver(&config).unwrap();

    let progress = Arc::new(Mutex::new(Vec::new()));
    let observer: ProgressObserver = {
        let progress = Arc::clone(&progress);
        Arc::new(move |state: ProgressState| progress.lock().push(state))
    };

    let batch = vec![
        "France, La Rochelle".to_string(),
        "NYC".to_string(),
        "Reykjavik, Iceland".to_string(),
        "the internet".to_string(),
        "NYC".to_string(),
        "Tokyo".to_string(),
    ];
    let result = resolver
        .resolve_all(&batch, Some(observer), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.len(), 5);
    assert_eq!(
        result.location("France, La Rochelle").unwrap().display_name,
        "La Rochelle, France"
    );
    assert_eq!(
        result.location("NYC").unwrap().display_name,
        "New York, United States"
    );
    assert_eq!(
        result.location("Reykjavik, Iceland").unwrap().display_name,
        "Reykjavík, Ísland"
    );
    assert_eq!(result.get("the internet"), Some(&LocationOutcome::Absent));
    assert_eq!(result.stats().remote_calls, 2);

    {
        let progress = progress.lock();
        assert_eq!(progress.len(), 5);
        assert!(progress.windows(2).all(|w| w[0].completed < w[1].completed));
        assert_eq!(progress.last().unwrap().phase, ProgressPhase::Complete);
    }

    // second run: everything resolved comes from the cache, the miss is retried
    let again = resolver
        .resolve_all(&batch, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.stats().cache_hits, 4);
    assert_eq!(again.stats().remote_calls, 1);
    assert_eq!(resolver.cache().size(), 4);
}

#[tokio::test]
async fn missing_gazetteer_falls_back_to_the_geocoder() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/data/worldcities.csv"))
            .times(1)
            .respond_with(status_code(404)),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/search"))
            .times(1)
            .respond_with(json_encoded(json!([{
                "lat": "35.6768601",
                "lon": "139.7638947",
                "display_name": "東京都, 日本"
            }]))),
    );

    let dir = tempdir().unwrap();
    let resolver = build_resolver(&config_for(&server, dir.path())).unwrap();
    let result = resolver
        .resolve_all(&["Tokyo"], None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.location("Tokyo").unwrap().display_name, "東京都, 日本");
    assert_eq!(result.stats().remote_calls, 1);
}
