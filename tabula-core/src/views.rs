// tabula_core/src/views.rs
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{DEFAULT_KEY_FIELDS, Record, RecordId};
use crate::util::normalize::{get_field, get_text, includes_folded};

pub trait ScreenView: Sized {
    fn from_record(rec: &Record) -> Self;
    fn to_record(&self) -> Record;
}

fn key_of(rec: &Record) -> Option<RecordId> {
    rec.key_value(&DEFAULT_KEY_FIELDS)
}

fn with_key(mut rec: Record, id: &Option<RecordId>) -> Record {
    if let Some(id) = id {
        rec.insert("Id", id.to_value());
    }
    rec
}

fn text(rec: &Record, label: &str) -> String {
    get_text(rec, label).unwrap_or_default()
}

fn opt_text(rec: &Record, label: &str) -> Option<String> {
    get_text(rec, label)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn number(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Coupon {
    pub id: Option<RecordId>,
    pub code: String,
    /// Percent.
    pub discount: f64,
    /// `YYYY-MM-DD`.
    pub valid_until: Option<String>,
}

impl Coupon {
    pub fn is_active(&self) -> bool {
        self.discount > 0.0
    }
}

impl ScreenView for Coupon {
    fn from_record(rec: &Record) -> Self {
        Self {
            id: key_of(rec),
            code: text(rec, "CUPPOM"),
            discount: number(get_field(rec, "DESCONTO")).unwrap_or(0.0),
            valid_until: opt_text(rec, "VALIDADE").map(|d| d.chars().take(10).collect()),
        }
    }

    fn to_record(&self) -> Record {
        let rec = Record::new()
            .with("CUPPOM", self.code.clone())
            .with("DESCONTO", self.discount)
            .with("VALIDADE", self.valid_until.clone().map_or(Value::Null, Value::from));
        with_key(rec, &self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WifiNetwork {
    pub id: Option<RecordId>,
    pub name: String,
    pub password_2g: String,
    pub password_5g: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub client: String,
}

impl WifiNetwork {
    /// Both coordinates present and inside valid ranges.
    pub fn position(&self) -> Option<(f64, f64)> {
        let (lat, lon) = (self.latitude?, self.longitude?);
        ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
    }

    pub fn lat_lng(&self) -> Option<LatLng> {
        self.position().map(|(lat, lng)| LatLng { lat, lng })
    }

    /// Name or client contains `query`, ignoring accents and case.
    pub fn matches(&self, query: &str) -> bool {
        includes_folded(&self.name, query) || includes_folded(&self.client, query)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Leading `-?\d+(\.\d+)?`, and what follows it.
fn take_number(s: &str) -> Option<(f64, &str)> {
    let b = s.as_bytes();
    let mut i = usize::from(b.first() == Some(&b'-'));
    let int_start = i;
    while b.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    if i == int_start {
        return None;
    }
    if b.get(i) == Some(&b'.') && b.get(i + 1).is_some_and(u8::is_ascii_digit) {
        i += 1;
        while b.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
    }
    Some((s[..i].parse().ok()?, &s[i..]))
}

/// Skips non-digits up to the next number, keeping a leading minus sign.
fn skip_to_number(s: &str) -> &str {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() {
        if b[i].is_ascii_digit() {
            break;
        }
        if b[i] == b'-' && b.get(i + 1).is_some_and(u8::is_ascii_digit) {
            break;
        }
        i += 1;
    }
    &s[i..]
}

impl LatLng {
    /// Reads `lat:-20.3 lng:-40.2` (any separators), `-20.3,-40.2` (comma,
    /// semicolon or space) and `[-20.3 -40.2]`.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.is_empty() {
            return None;
        }
        Self::parse_labeled(s)
            .or_else(|| Self::parse_pair(s))
            .or_else(|| Self::parse_bracketed(s))
    }

    fn parse_labeled(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        let at = lower.find("lat")? + 3;
        let (lat, rest) = take_number(skip_to_number(&s[at..]))?;
        let lng_at = rest.to_ascii_lowercase().find("lng")?;
        if rest[..lng_at].bytes().any(|c| c.is_ascii_digit()) {
            return None;
        }
        let (lng, _) = take_number(skip_to_number(&rest[lng_at + 3..]))?;
        Some(Self { lat, lng })
    }

    fn parse_pair(s: &str) -> Option<Self> {
        let (lat, rest) = take_number(s)?;
        let trimmed = rest.trim_start();
        let spaced = trimmed.len() < rest.len();
        let after = match trimmed.strip_prefix([',', ';']) {
            Some(r) => r.trim_start(),
            None if spaced => trimmed,
            None => return None,
        };
        let (lng, tail) = take_number(after)?;
        tail.trim().is_empty().then_some(Self { lat, lng })
    }

    fn parse_bracketed(s: &str) -> Option<Self> {
        let open = s.find('[')?;
        let inner = &s[open + 1..];
        let inner = &inner[..inner.find(']')?];
        let (lat, rest) = take_number(inner.trim_start())?;
        let rest_trimmed = rest.trim_start();
        if rest_trimmed.len() == rest.len() {
            return None;
        }
        let (lng, tail) = take_number(rest_trimmed)?;
        tail.trim().is_empty().then_some(Self { lat, lng })
    }

    /// Great-circle distance (haversine).
    pub fn distance_km(&self, other: &LatLng) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let s1 = (d_lat / 2.0).sin().powi(2);
        let s2 = (d_lng / 2.0).sin().powi(2);
        let h = s1 + self.lat.to_radians().cos() * other.lat.to_radians().cos() * s2;
        2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
    }
}

/// Networks within `radius_km` of `origin`, nearest first. When none is that
/// close, the `fallback_take` nearest ones instead. Networks without a valid
/// position are left out.
pub fn nearest_networks<'a>(
    origin: &LatLng,
    networks: &'a [WifiNetwork],
    radius_km: f64,
    fallback_take: usize,
) -> Vec<&'a WifiNetwork> {
    let mut ranked: Vec<(f64, &WifiNetwork)> = networks
        .iter()
        .filter_map(|n| Some((origin.distance_km(&n.lat_lng()?), n)))
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));
    let within = ranked.iter().take_while(|(d, _)| *d <= radius_km).count();
    let take = if within > 0 { within } else { fallback_take };
    ranked.into_iter().take(take).map(|(_, n)| n).collect()
}

impl ScreenView for WifiNetwork {
    fn from_record(rec: &Record) -> Self {
        Self {
            id: key_of(rec),
            name: text(rec, "NOME-WIFI"),
            password_2g: text(rec, "SENHA-WIFI-2G"),
            password_5g: text(rec, "SENHA-WIFI-5G"),
            latitude: number(get_field(rec, "LATITUDE")),
            longitude: number(get_field(rec, "LONGITUDE")),
            client: text(rec, "NOME-CLIENTE"),
        }
    }

    fn to_record(&self) -> Record {
        let coord = |c: Option<f64>| c.map_or(Value::Null, |c| Value::from(c.to_string()));
        let rec = Record::new()
            .with("NOME-WIFI", self.name.clone())
            .with("SENHA-WIFI-2G", self.password_2g.clone())
            .with("SENHA-WIFI-5G", self.password_5g.clone())
            .with("LATITUDE", coord(self.latitude))
            .with("LONGITUDE", coord(self.longitude))
            .with("NOME-CLIENTE", self.client.clone());
        with_key(rec, &self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaqAnswer {
    #[serde(rename = "Resposta_Pergunta", default)]
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaqQuestion {
    #[serde(rename = "Pergunta", default)]
    pub question: String,
    /// The first answer is the displayed text.
    #[serde(rename = "Resposta", default)]
    pub answers: Vec<FaqAnswer>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FaqGroup {
    #[serde(rename = "Numero_Pergunta", default)]
    pub number: String,
    #[serde(rename = "Perguntas", default)]
    pub questions: Vec<FaqQuestion>,
}

/// The FAQ screen keeps every group in one row, as JSON.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FaqEntry {
    pub id: Option<RecordId>,
    pub groups: Vec<FaqGroup>,
}

fn parse_groups(v: Option<&Value>) -> Option<Vec<FaqGroup>> {
    let v = v?;
    match v {
        Value::Array(_) => serde_json::from_value(v.clone()).ok(),
        Value::String(s) if !s.trim().is_empty() => serde_json::from_str(s).ok(),
        _ => None,
    }
}

impl ScreenView for FaqEntry {
    fn from_record(rec: &Record) -> Self {
        let groups = parse_groups(rec.get("DuvidasJson"))
            .or_else(|| parse_groups(rec.get("Duvidas")))
            .unwrap_or_default();
        Self {
            id: key_of(rec),
            groups,
        }
    }

    /// Writes the structured column and its string twin.
    fn to_record(&self) -> Record {
        let value = serde_json::to_value(&self.groups).unwrap_or(Value::Array(Vec::new()));
        let rec = Record::new()
            .with("DuvidasJson", value.clone())
            .with("Duvidas", value.to_string());
        with_key(rec, &self.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Plan {
    Turbo,
    Gold,
    Infinity,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Turbo, Plan::Gold, Plan::Infinity];

    pub fn name(self) -> &'static str {
        match self {
            Plan::Turbo => "Turbo",
            Plan::Gold => "Gold",
            Plan::Infinity => "Infinity",
        }
    }

    pub fn column(self) -> String {
        format!("Plano - {} - Serviço Adicional", self.name())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Plan::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddonItem {
    pub name: String,
    pub url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanAddons {
    pub id: Option<RecordId>,
    pub title: Option<String>,
    pub turbo: Vec<AddonItem>,
    pub gold: Vec<AddonItem>,
    pub infinity: Vec<AddonItem>,
    pub best_seller: Option<Plan>,
}

impl PlanAddons {
    pub fn items(&self, plan: Plan) -> &[AddonItem] {
        match plan {
            Plan::Turbo => &self.turbo,
            Plan::Gold => &self.gold,
            Plan::Infinity => &self.infinity,
        }
    }

    pub fn items_mut(&mut self, plan: Plan) -> &mut Vec<AddonItem> {
        match plan {
            Plan::Turbo => &mut self.turbo,
            Plan::Gold => &mut self.gold,
            Plan::Infinity => &mut self.infinity,
        }
    }
}

fn first_url(v: &Value) -> Option<String> {
    let pick = |o: &Value| {
        ["url", "URL", "Url"]
            .iter()
            .find_map(|k| o.get(k).and_then(Value::as_str).map(str::to_string))
    };
    match v {
        Value::Array(a) => a.first().and_then(pick),
        Value::Object(_) => pick(v),
        _ => None,
    }
}

fn addon_item(v: &Value) -> Option<AddonItem> {
    let name = ["nome", "Nome"]
        .iter()
        .find_map(|k| v.get(k))
        .map(|n| match n {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|n| !n.is_empty())?;
    let url = v
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| ["Foto", "foto"].iter().find_map(|k| v.get(k)).and_then(first_url));
    Some(AddonItem { name, url })
}

fn services(v: &Value) -> Option<&Vec<Value>> {
    v.get("Serviços")
        .or_else(|| v.get("Servicos"))
        .and_then(Value::as_array)
}

/// Accepts `[{Plano, Serviços: [..]}]`, a bare object with `Serviços`, or a
/// flat item array. Strings are parsed as JSON, retrying with single quotes
/// swapped for double quotes.
fn parse_addons(v: Option<&Value>) -> Vec<AddonItem> {
    let parsed;
    let raw = match v {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::String(s)) => {
            parsed = serde_json::from_str::<Value>(s)
                .or_else(|_| serde_json::from_str::<Value>(&s.replace('\'', "\"")));
            match &parsed {
                Ok(v) => v,
                Err(_) => return Vec::new(),
            }
        }
        Some(v) => v,
    };
    let list = match raw {
        Value::Array(arr) => match arr.iter().find_map(services) {
            Some(inner) => inner,
            None => arr,
        },
        Value::Object(_) => match services(raw) {
            Some(inner) => inner,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter().filter_map(addon_item).collect()
}

fn addons_json(plan: Plan, items: &[AddonItem]) -> String {
    let servicos: Vec<Value> = items
        .iter()
        .filter(|i| !i.name.trim().is_empty())
        .map(|i| {
            let foto = match &i.url {
                Some(u) => json!([{ "url": u }]),
                None => json!([]),
            };
            json!({ "nome": i.name, "Foto": foto })
        })
        .collect();
    let payload = json!([{ "Plano": plan.name(), "Serviços": servicos }]);
    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
}

impl ScreenView for PlanAddons {
    fn from_record(rec: &Record) -> Self {
        let of = |plan: Plan| parse_addons(get_field(rec, &format!("{} Serviço Adicional", plan.name())));
        Self {
            id: key_of(rec),
            title: opt_text(rec, "Title"),
            turbo: of(Plan::Turbo),
            gold: of(Plan::Gold),
            infinity: of(Plan::Infinity),
            best_seller: opt_text(rec, "Tag-MaisVendido").and_then(|t| Plan::parse(&t)),
        }
    }

    fn to_record(&self) -> Record {
        let mut rec = Record::new();
        for plan in Plan::ALL {
            rec.insert(plan.column(), addons_json(plan, self.items(plan)));
        }
        rec.insert(
            "Tag-MaisVendido",
            self.best_seller.map(Plan::name).unwrap_or(""),
        );
        with_key(rec, &self.id)
    }
}

/// Download links, phone number and social profiles. Each lives in its own
/// table; fields a table lacks stay `None` and are not written back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContactLinks {
    pub id: Option<RecordId>,
    pub android: Option<String>,
    pub ios: Option<String>,
    pub phone: Option<String>,
    pub instagram: Option<String>,
    pub youtube: Option<String>,
    pub facebook: Option<String>,
}

impl ContactLinks {
    const COLUMNS: [&'static str; 6] = ["Android", "IOS", "Numero", "Instagram", "Youtube", "Facebook"];

    fn slots(&self) -> [&Option<String>; 6] {
        [
            &self.android,
            &self.ios,
            &self.phone,
            &self.instagram,
            &self.youtube,
            &self.facebook,
        ]
    }
}

impl ScreenView for ContactLinks {
    fn from_record(rec: &Record) -> Self {
        // Exact names only: "IOS" would otherwise match inside other headers.
        let exact = |k: &str| {
            rec.get(k).and_then(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };
        Self {
            id: key_of(rec),
            android: exact("Android"),
            ios: exact("IOS"),
            phone: exact("Numero"),
            instagram: exact("Instagram"),
            youtube: exact("Youtube"),
            facebook: exact("Facebook"),
        }
    }

    fn to_record(&self) -> Record {
        let mut rec = Record::new();
        for (col, val) in Self::COLUMNS.iter().zip(self.slots()) {
            if let Some(v) = val {
                rec.insert(*col, v.clone());
            }
        }
        with_key(rec, &self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DynamicPhrase {
    pub id: Option<RecordId>,
    pub plain: String,
    pub animated: String,
    /// e.g. `big`
    pub effect: String,
    /// CSS color of the animated part.
    pub color: String,
}

impl ScreenView for DynamicPhrase {
    fn from_record(rec: &Record) -> Self {
        Self {
            id: key_of(rec),
            plain: text(rec, "Part_Frase_Sem_Efeito"),
            animated: text(rec, "Part_Frase_Com_Efeito"),
            effect: text(rec, "Efeito"),
            color: text(rec, "colorTextAnimado"),
        }
    }

    fn to_record(&self) -> Record {
        let rec = Record::new()
            .with("Part_Frase_Sem_Efeito", self.plain.clone())
            .with("Part_Frase_Com_Efeito", self.animated.clone())
            .with("Efeito", self.effect.clone())
            .with("colorTextAnimado", self.color.clone());
        with_key(rec, &self.id)
    }
}
