use regex::Regex;

/// Schema identifiers may only contain ASCII letters, digits, and underscores.
/// Anything else never reaches the SQL text.
const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9_]+$";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Upstream PON proxy endpoint receiving the per-OLT optics requests.
    pub pon_proxy_url: String,
    pub schema: SchemaConfig,
    pub light: LightConfig,
}

/// Table and column identifiers for the address inventory table.
///
/// Every identifier here is interpolated into SQL text, so the full set is
/// validated against [`IDENTIFIER_PATTERN`] before the server starts taking
/// traffic. Filter values never travel this path; they bind as parameters.
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    pub table: String,
    /// Optional primary-key column. Without it the points query falls back to
    /// a synthetic row number and an empty accounts aggregate.
    pub id_column: Option<String>,
    pub lat_column: String,
    pub lng_column: String,
    pub city_column: String,
    pub address_column: String,
    pub line2_column: String,
    pub subdivision_column: String,
    pub zip_column: String,
    pub fda_fdh_column: String,
    pub drop_column: String,
    pub serviceable_column: String,
}

/// One city-to-OLT-prefix narrowing rule for fan-out requests.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CityPrefixRule {
    pub city: String,
    pub prefix: String,
}

/// Optical diagnostics settings: target device, allow-lists, port bounds,
/// and the low-light classification threshold.
#[derive(Debug, Clone)]
pub struct LightConfig {
    pub device_ip: String,
    pub allowed_olts: Vec<String>,
    pub allowed_slots: Vec<String>,
    pub min_port: i64,
    pub max_port: i64,
    /// Receive power at or below this value (dBm) classifies as low light.
    pub low_light_threshold_dbm: f64,
    pub city_olt_prefixes: Vec<CityPrefixRule>,
    /// When set, a recurring fan-out starts at boot with this period.
    pub auto_interval_seconds: Option<u64>,
}

impl SchemaConfig {
    fn from_env() -> Self {
        Self {
            table: env_or("TABLE_NAME", "address_data"),
            id_column: std::env::var("ID_COLUMN")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            lat_column: env_or("LAT_COLUMN", "latitude"),
            lng_column: env_or("LNG_COLUMN", "longitude"),
            city_column: env_or("CITY_COLUMN", "city"),
            address_column: env_or("ADDRESS_COLUMN", "address"),
            line2_column: env_or("LINE2_COLUMN", "line2"),
            subdivision_column: env_or("SUBDIVISION_COLUMN", "subdivision"),
            zip_column: env_or("ZIP_COLUMN", "zip"),
            fda_fdh_column: env_or("FDA_FDH_COLUMN", "fda_fdh"),
            drop_column: env_or("DROP_COLUMN", "drop"),
            serviceable_column: env_or("SERVICEABLE_COLUMN", "serviceable"),
        }
    }

    /// All configured identifiers paired with the environment key that set
    /// them. Drives startup validation and the schema verification tool.
    pub fn identifier_entries(&self) -> Vec<(&'static str, &str)> {
        let mut entries = vec![
            ("TABLE_NAME", self.table.as_str()),
            ("LAT_COLUMN", self.lat_column.as_str()),
            ("LNG_COLUMN", self.lng_column.as_str()),
            ("CITY_COLUMN", self.city_column.as_str()),
            ("ADDRESS_COLUMN", self.address_column.as_str()),
            ("LINE2_COLUMN", self.line2_column.as_str()),
            ("SUBDIVISION_COLUMN", self.subdivision_column.as_str()),
            ("ZIP_COLUMN", self.zip_column.as_str()),
            ("FDA_FDH_COLUMN", self.fda_fdh_column.as_str()),
            ("DROP_COLUMN", self.drop_column.as_str()),
            ("SERVICEABLE_COLUMN", self.serviceable_column.as_str()),
        ];
        if let Some(ref id) = self.id_column {
            entries.push(("ID_COLUMN", id.as_str()));
        }
        entries
    }

    /// Rejects any identifier outside the `[A-Za-z0-9_]+` allow-list, naming
    /// the offending environment key. Runs once before the pool is opened.
    pub fn validate(&self) -> anyhow::Result<()> {
        let pattern = Regex::new(IDENTIFIER_PATTERN)
            .map_err(|e| anyhow::anyhow!("identifier pattern failed to compile: {e}"))?;
        for (key, value) in self.identifier_entries() {
            if !pattern.is_match(value) {
                anyhow::bail!("{key} contains invalid characters: {value}");
            }
        }
        Ok(())
    }
}

impl LightConfig {
    fn from_env() -> anyhow::Result<Self> {
        let min_port: i64 = env_or("LIGHT_MIN_PORT", "1")
            .parse()
            .map_err(|_| anyhow::anyhow!("LIGHT_MIN_PORT must be an integer"))?;
        let max_port: i64 = env_or("LIGHT_MAX_PORT", "16")
            .parse()
            .map_err(|_| anyhow::anyhow!("LIGHT_MAX_PORT must be an integer"))?;
        if min_port > max_port {
            anyhow::bail!("LIGHT_MIN_PORT ({min_port}) exceeds LIGHT_MAX_PORT ({max_port})");
        }

        let low_light_threshold_dbm: f64 = env_or("LIGHT_LOW_THRESHOLD_DBM", "-24.9")
            .parse()
            .map_err(|_| anyhow::anyhow!("LIGHT_LOW_THRESHOLD_DBM must be a number"))?;

        let auto_interval_seconds = match std::env::var("LIGHT_AUTO_INTERVAL_SECONDS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("LIGHT_AUTO_INTERVAL_SECONDS must be an integer"))?;
                if secs == 0 {
                    None
                } else {
                    Some(secs)
                }
            }
            _ => None,
        };

        Ok(Self {
            device_ip: env_or("LIGHT_IP", "172.30.36.146"),
            allowed_olts: split_csv(&env_or("LIGHT_ALLOWED_OLTS", "")),
            allowed_slots: split_csv(&env_or("LIGHT_ALLOWED_SLOTS", "LT1,LT2")),
            min_port,
            max_port,
            low_light_threshold_dbm,
            city_olt_prefixes: parse_city_prefixes(&env_or(
                "CITY_OLT_PREFIXES",
                "Arlington=DFW2-,McKinney=DFW3-,Rockwall=DFW4-",
            ))?,
            auto_interval_seconds,
        })
    }

    /// OLTs permitted for a given city. Cities without a prefix rule see the
    /// full allow-list.
    pub fn olts_for_city(&self, city: &str) -> Vec<String> {
        match self.prefix_for_city(city) {
            Some(prefix) => self
                .allowed_olts
                .iter()
                .filter(|olt| olt.starts_with(prefix))
                .cloned()
                .collect(),
            None => self.allowed_olts.clone(),
        }
    }

    fn prefix_for_city(&self, city: &str) -> Option<&str> {
        self.city_olt_prefixes
            .iter()
            .find(|rule| rule.city == city)
            .map(|rule| rule.prefix.as_str())
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DATABASE_URL")
                .or_else(|_| std::env::var("DB_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DATABASE_URL or DB_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DATABASE_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            pon_proxy_url: std::env::var("PON_PROXY_URL")
                .unwrap_or_else(|_| "https://api.novosfiber.com/pon_proxy.php".to_string()),
            schema: SchemaConfig::from_env(),
            light: LightConfig::from_env()?,
        };

        url::Url::parse(&config.pon_proxy_url)
            .map_err(|e| anyhow::anyhow!("PON_PROXY_URL is not a valid URL: {e}"))?;
        if !config.pon_proxy_url.starts_with("http://")
            && !config.pon_proxy_url.starts_with("https://")
        {
            anyhow::bail!("PON_PROXY_URL must start with http:// or https://");
        }

        config.schema.validate()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Inventory table: {}", config.schema.table);
        tracing::debug!("PON proxy URL: {}", config.pon_proxy_url);
        tracing::debug!(
            "Light device {} with {} OLT(s), {} slot(s), ports {}-{}",
            config.light.device_ip,
            config.light.allowed_olts.len(),
            config.light.allowed_slots.len(),
            config.light.min_port,
            config.light.max_port
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_city_prefixes(raw: &str) -> anyhow::Result<Vec<CityPrefixRule>> {
    let mut rules = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (city, prefix) = entry.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("CITY_OLT_PREFIXES entry must be City=Prefix, got: {entry}")
        })?;
        let city = city.trim();
        let prefix = prefix.trim();
        if city.is_empty() || prefix.is_empty() {
            anyhow::bail!("CITY_OLT_PREFIXES entry must be City=Prefix, got: {entry}");
        }
        rules.push(CityPrefixRule {
            city: city.to_string(),
            prefix: prefix.to_string(),
        });
    }
    Ok(rules)
}
