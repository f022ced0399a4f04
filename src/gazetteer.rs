use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

const EXPECTED_COLUMNS: usize = 11;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub city: String,
    pub city_ascii: String,
    pub lat: f64,
    pub lng: f64,
    pub country: String,
    pub iso2: String,
    pub iso3: String,
    pub admin_name: String,
    pub capital: String,
    pub population: u64,
    pub id: String,
}

impl Place {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.city, self.country)
    }

    pub fn matches_qualifier(&self, qualifier: &str) -> bool {
        let wanted = qualifier.trim().to_lowercase();
        if wanted.is_empty() {
            return false;
        }
        let eq = |candidate: &str| !candidate.is_empty() && candidate.to_lowercase() == wanted;
        eq(&self.country)
            || eq(&self.iso2)
            || eq(&self.admin_name)
            || country_aliases(&self.country).iter().any(|alias| eq(alias))
            || self.us_state_code().map(|code| eq(code)).unwrap_or(false)
    }

    fn us_state_code(&self) -> Option<&'static str> {
        if self.iso2 == "US" {
            us_state_abbreviation(&self.admin_name)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub enum DatasetSource {
    Path(PathBuf),
    Url(String),
    Inline(String),
}

impl DatasetSource {
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            DatasetSource::Url(trimmed.to_string())
        } else {
            DatasetSource::Path(PathBuf::from(trimmed))
        }
    }

    fn describe(&self) -> String {
        match self {
            DatasetSource::Path(path) => path.display().to_string(),
            DatasetSource::Url(url) => url.clone(),
            DatasetSource::Inline(_) => "<inline>".to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct GazetteerIndex {
    places: Vec<Place>,
    keys: HashMap<String, Vec<usize>>,
}

impl GazetteerIndex {
    pub fn from_places(places: impl IntoIterator<Item = Place>) -> Self {
        let mut index = Self::default();
        for place in places {
            index.insert(place);
        }
        index
    }

    pub fn from_reader<R: Read>(reader: R) -> AppResult<Self> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let header_len = reader.headers()?.len();
        if header_len < EXPECTED_COLUMNS {
            return Err(AppError::DatasetLoadFailed(format!(
                "expected {EXPECTED_COLUMNS} columns in header, found {header_len}"
            )));
        }

        let mut index = Self::default();
        let mut skipped = 0_usize;
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    debug!(target: "gazetteer", line, error = %err, "unreadable dataset row");
                    skipped += 1;
                    continue;
                }
            };
            if record.len() != header_len {
                skipped += 1;
                continue;
            }
            match parse_place(&record) {
                Some(place) => index.insert(place),
                None => skipped += 1,
            }
        }

        debug!(
            target: "gazetteer",
            places = index.places.len(),
            keys = index.keys.len(),
            skipped,
            "parsed gazetteer dataset"
        );
        Ok(index)
    }

    pub fn lookup(&self, key: &str) -> Vec<&Place> {
        let key = key.trim().to_lowercase();
        self.keys
            .get(&key)
            .map(|ids| ids.iter().map(|id| &self.places[*id]).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    fn insert(&mut self, place: Place) {
        let id = self.places.len();
        let mut spellings = vec![place.city.clone()];
        if !place.city_ascii.is_empty() && place.city_ascii != place.city {
            spellings.push(place.city_ascii.clone());
        }

        let mut qualifiers = vec![
            place.country.clone(),
            place.iso2.clone(),
            place.admin_name.clone(),
        ];
        if let Some(code) = place.us_state_code() {
            qualifiers.push(code.to_string());
        }
        qualifiers.extend(
            country_aliases(&place.country)
                .iter()
                .map(|alias| alias.to_string()),
        );

        for spelling in &spellings {
            self.add_key(spelling.to_lowercase(), id);
            for qualifier in qualifiers.iter().filter(|q| !q.is_empty()) {
                self.add_key(format!("{spelling}, {qualifier}").to_lowercase(), id);
            }
        }
        self.places.push(place);
    }

    fn add_key(&mut self, key: String, id: usize) {
        if key.is_empty() {
            return;
        }
        let ids = self.keys.entry(key).or_default();
        if ids.last() != Some(&id) {
            ids.push(id);
        }
    }
}

pub async fn load(source: &DatasetSource, http: &reqwest::Client) -> AppResult<GazetteerIndex> {
    let bytes = match source {
        DatasetSource::Path(path) => tokio::fs::read(path)
            .await
            .map_err(|err| AppError::DatasetLoadFailed(format!("{}: {err}", path.display())))?,
        DatasetSource::Url(url) => {
            let response = http
                .get(url)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(|err| AppError::DatasetLoadFailed(format!("{url}: {err}")))?;
            response
                .bytes()
                .await
                .map_err(|err| AppError::DatasetLoadFailed(format!("{url}: {err}")))?
                .to_vec()
        }
        DatasetSource::Inline(text) => text.as_bytes().to_vec(),
    };

    let index = GazetteerIndex::from_reader(bytes.as_slice())?;
    if index.is_empty() {
        return Err(AppError::DatasetLoadFailed(format!(
            "{} contained no usable rows",
            source.describe()
        )));
    }
    info!(
        target: "gazetteer",
        source = %source.describe(),
        places = index.len(),
        keys = index.key_count(),
        "gazetteer index ready"
    );
    Ok(index)
}

fn parse_place(record: &StringRecord) -> Option<Place> {
    let field = |idx: usize| record.get(idx).map(str::trim).unwrap_or_default();
    let city = field(0);
    if city.is_empty() {
        return None;
    }
    let lat = field(2).parse::<f64>().ok().filter(|v| v.is_finite())?;
    let lng = field(3).parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some(Place {
        city: city.to_string(),
        city_ascii: field(1).to_string(),
        lat,
        lng,
        country: field(4).to_string(),
        iso2: field(5).to_string(),
        iso3: field(6).to_string(),
        admin_name: field(7).to_string(),
        capital: field(8).to_string(),
        population: parse_population(field(9)),
        id: field(10).to_string(),
    })
}

fn parse_population(value: &str) -> u64 {
    value
        .parse::<u64>()
        .ok()
        .or_else(|| {
            value
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| v as u64)
        })
        .unwrap_or(0)
}

pub fn country_aliases(country: &str) -> &'static [&'static str] {
    match country {
        "United States" => &["USA", "US", "United States of America", "America"],
        "United Kingdom" => &["UK", "Great Britain", "Britain", "England", "Scotland", "Wales"],
        "Netherlands" => &["Holland", "The Netherlands"],
        "Germany" => &["Deutschland"],
        "Russia" => &["Russian Federation"],
        "Korea, South" => &["South Korea", "Korea"],
        "Czechia" => &["Czech Republic"],
        "United Arab Emirates" => &["UAE"],
        "China" => &["PRC"],
        "Switzerland" => &["Schweiz", "Suisse"],
        "Spain" => &["España"],
        "Brazil" => &["Brasil"],
        "Côte d'Ivoire" => &["Ivory Coast"],
        _ => &[],
    }
}

pub fn us_state_abbreviation(state: &str) -> Option<&'static str> {
    US_STATES
        .iter()
        .find(|(name, _)| *name == state)
        .map(|(_, code)| *code)
}

const US_STATES: &[(&str, &str)] = &[
    ("Alabama", "AL"),
    ("Alaska", "AK"),
    ("Arizona", "AZ"),
    ("Arkansas", "AR"),
    ("California", "CA"),
    ("Colorado", "CO"),
    ("Connecticut", "CT"),
    ("Delaware", "DE"),
    ("Florida", "FL"),
    ("Georgia", "GA"),
    ("Hawaii", "HI"),
    ("Idaho", "ID"),
    ("Illinois", "IL"),
    ("Indiana", "IN"),
    ("Iowa", "IA"),
    ("Kansas", "KS"),
    ("Kentucky", "KY"),
    ("Louisiana", "LA"),
    ("Maine", "ME"),
    ("Maryland", "MD"),
    ("Massachusetts", "MA"),
    ("Michigan", "MI"),
    ("Minnesota", "MN"),
    ("Mississippi", "MS"),
    ("Missouri", "MO"),
    ("Montana", "MT"),
    ("Nebraska", "NE"),
    ("Nevada", "NV"),
    ("New Hampshire", "NH"),
    ("New Jersey", "NJ"),
    ("New Mexico", "NM"),
    ("New York", "NY"),
    ("North Carolina", "NC"),
    ("North Dakota", "ND"),
    ("Ohio", "OH"),
    ("Oklahoma", "OK"),
    ("Oregon", "OR"),
    ("Pennsylvania", "PA"),
    ("Rhode Island", "RI"),
    ("South Carolina", "SC"),
    ("South Dakota", "SD"),
    ("Tennessee", "TN"),
    ("Texas", "TX"),
    ("Utah", "UT"),
    ("Vermont", "VT"),
    ("Virginia", "VA"),
    ("Washington", "WA"),
    ("West Virginia", "WV"),
    ("Wisconsin", "WI"),
    ("Wyoming", "WY"),
    ("District of Columbia", "DC"),
];

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE_CSV: &str = r#""city","city_ascii","lat","lng","country","iso2","iso3","admin_name","capital","population","id"
"New York","New York","40.6943","-73.9249","United States","US","USA","New York","","18972871","1840034016"
"San Francisco","San Francisco","37.7558","-122.4449","United States","US","USA","California","","3364862","1840021543"
"La Rochelle","La Rochelle","46.1591","-1.1517","France","FR","FRA","Nouvelle-Aquitaine","minor","77205","1250000001"
"Paris","Paris","48.8567","2.3522","France","FR","FRA","Île-de-France","primary","11060000","1250015082"
"Paris","Paris","33.6688","-95.5460","United States","US","USA","Texas","","24476","1840020642"
"Portland","Portland","45.5372","-122.6500","United States","US","USA","Oregon","","2095808","1840019941"
"Portland","Portland","43.6773","-70.2715","United States","US","USA","Maine","","68424","1840000327"
"Springfield","Springfield","-27.6536","152.9170","Australia","AU","AUS","Queensland","","20000","1036000001"
"Springfield","Springfield","39.7709","-89.6540","United States","US","USA","Illinois","admin","100","1840009517"
"Amsterdam","Amsterdam","52.3728","4.8936","Netherlands","NL","NLD","Noord-Holland","primary","1459402","1528355309"
"Düsseldorf","Dusseldorf","51.2333","6.7833","Germany","DE","DEU","North Rhine-Westphalia","admin","620523","1276615258"
"Broken, Row","Broken","1.0","2.0","Nowhere"
"Washington","Washington","38.9047","-77.0163","United States","US","USA","District of Columbia","primary","5116378","1840006060"
"#;

    pub(crate) fn sample_index() -> GazetteerIndex {
        GazetteerIndex::from_reader(SAMPLE_CSV.as_bytes()).unwrap()
    }

    #[test]
    fn skips_rows_with_wrong_field_count() {
        let index = sample_index();
        assert_eq!(index.len(), 12);
        assert!(index.lookup("broken, row").is_empty());
        assert_eq!(index.lookup("washington").len(), 1);
    }

    #[test]
    fn quoted_fields_keep_embedded_delimiters() {
        let csv = "city,city_ascii,lat,lng,country,iso2,iso3,admin_name,capital,population,id\n\
                   Seoul,Seoul,37.56,126.99,\"Korea, South\",KR,KOR,Seoul,primary,23016000,1410836482\n";
        let index = GazetteerIndex::from_reader(csv.as_bytes()).unwrap();
        let places = index.lookup("seoul, korea, south");
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].country, "Korea, South");
        assert_eq!(index.lookup("seoul, south korea").len(), 1);
    }

    #[test]
    fn indexes_every_key_variant() {
        let index = sample_index();
        assert_eq!(index.lookup("La Rochelle").len(), 1);
        assert_eq!(index.lookup("la rochelle, france").len(), 1);
        assert_eq!(index.lookup("la rochelle, fr").len(), 1);
        assert_eq!(index.lookup("la rochelle, nouvelle-aquitaine").len(), 1);
        assert_eq!(index.lookup("portland, or").len(), 1);
        assert_eq!(index.lookup("portland, me")[0].admin_name, "Maine");
        assert_eq!(index.lookup("amsterdam, holland").len(), 1);
        assert_eq!(index.lookup("new york, usa").len(), 1);
        assert_eq!(index.lookup("dusseldorf").len(), 1);
        assert_eq!(index.lookup("düsseldorf, deutschland").len(), 1);
        assert_eq!(index.lookup("dusseldorf, germany").len(), 1);
    }

    #[test]
    fn keeps_dataset_order_within_a_key() {
        let index = sample_index();
        let paris: Vec<_> = index.lookup("paris").iter().map(|p| p.iso2.clone()).collect();
        assert_eq!(paris, vec!["FR", "US"]);
        assert_eq!(index.lookup("new york").len(), 1);
    }

    #[test]
    fn qualifier_matches_aliases_and_codes() {
        let index = sample_index();
        let portland = index.lookup("portland, maine")[0];
        assert!(portland.matches_qualifier("Maine"));
        assert!(portland.matches_qualifier("me"));
        assert!(portland.matches_qualifier("USA"));
        assert!(portland.matches_qualifier("united states"));
        assert!(!portland.matches_qualifier("Oregon"));
        assert!(!portland.matches_qualifier(""));
    }

    #[test]
    fn population_falls_back_to_zero() {
        assert_eq!(parse_population("1234"), 1234);
        assert_eq!(parse_population("1234.0"), 1234);
        assert_eq!(parse_population(""), 0);
        assert_eq!(parse_population("n/a"), 0);
    }

    #[tokio::test]
    async fn empty_dataset_is_a_load_failure() {
        let source = DatasetSource::Inline(
            "city,city_ascii,lat,lng,country,iso2,iso3,admin_name,capital,population,id\n".into(),
        );
        let result = load(&source, &reqwest::Client::new()).await;
        assert!(matches!(result, Err(AppError::DatasetLoadFailed(_))));
    }

    #[tokio::test]
    async fn missing_file_is_a_load_failure() {
        let source = DatasetSource::parse("/definitely/not/here.csv");
        let result = load(&source, &reqwest::Client::new()).await;
        assert!(matches!(result, Err(AppError::DatasetLoadFailed(_))));
    }

    #[test]
    fn parses_source_kinds() {
        assert!(matches!(
            DatasetSource::parse("https://example.com/cities.csv"),
            DatasetSource::Url(_)
        ));
        assert!(matches!(
            DatasetSource::parse("data/worldcities.csv"),
            DatasetSource::Path(_)
        ));
    }
}
