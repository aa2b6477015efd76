use crate::installer::types::PluginType;
use crate::registry::PluginRegistry;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Response envelope shared by every store endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Value,
}

pub const SUCCESS_CODE: i64 = 200;

/// Plugin as described by the store catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginDescriptor {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub plugin_key: String,
    /// Raw wire type; see [`PluginType`]
    #[serde(rename = "type", deserialize_with = "lenient_i64")]
    pub kind: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// Catalog rows usually name the plugin here rather than in `name`
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub plugin_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub icon: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub update_content: String,
    /// Fields the client does not interpret (price, author, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginDescriptor {
    pub fn plugin_type(&self) -> Option<PluginType> {
        PluginType::from_i64(self.kind)
    }

    /// `plugin_name` when the store sent one, `name` otherwise.
    pub fn display_name(&self) -> &str {
        match self.plugin_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.name,
        }
    }
}

/// Catalog row annotated with the local install status
#[derive(Debug, Clone, Serialize)]
pub struct ListedPlugin {
    #[serde(flatten)]
    pub descriptor: PluginDescriptor,
    /// 1 when installed locally; absent for unknown plugin types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_version: Option<String>,
}

/// Catalog query
#[derive(Debug, Clone, Default)]
pub struct PluginFilter {
    /// None lists every type
    pub plugin_type: Option<PluginType>,
    pub keywords: Option<String>,
    pub page: u32,
    pub limit: u32,
    pub group: i64,
}

impl PluginFilter {
    /// Raw type sent to the store; -1 selects all types.
    pub fn wire_type(&self) -> i64 {
        self.plugin_type.map(PluginType::as_i64).unwrap_or(-1)
    }
}

/// Catalog page as returned by the store
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePluginPage {
    #[serde(default)]
    pub rows: Vec<PluginDescriptor>,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub purchase: Value,
}

/// Catalog page with local install status
#[derive(Debug, Clone, Serialize)]
pub struct CatalogPage {
    pub rows: Vec<ListedPlugin>,
    pub count: i64,
    pub user: Value,
    pub purchase: Value,
}

impl CatalogPage {
    pub fn decorate(page: RemotePluginPage, registry: &PluginRegistry) -> Self {
        let rows = page
            .rows
            .into_iter()
            .map(|descriptor| {
                let status = registry.status_for(&descriptor.plugin_key, descriptor.kind);
                ListedPlugin {
                    install: status.as_ref().map(|s| u8::from(s.installed)),
                    local_version: status.and_then(|s| s.local_version),
                    descriptor,
                }
            })
            .collect();
        Self {
            rows,
            count: page.count,
            user: page.user,
            purchase: page.purchase,
        }
    }
}

/// Update cache entry for one plugin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateSummary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub icon: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub update_content: String,
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(rename = "type", deserialize_with = "lenient_i64")]
    pub kind: i64,
}

impl From<&PluginDescriptor> for UpdateSummary {
    fn from(plugin: &PluginDescriptor) -> Self {
        Self {
            icon: plugin.icon.clone(),
            name: plugin.display_name().to_string(),
            version: plugin.version.clone(),
            update_content: plugin.update_content.clone(),
            id: plugin.id,
            kind: plugin.kind,
        }
    }
}

/// Cookie session carried across captcha and register
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Captcha challenge and the session it belongs to
#[derive(Debug, Clone, Serialize)]
pub struct Captcha {
    pub image: Value,
    pub session: SessionToken,
}

/// Plugin metadata submitted by developers
#[derive(Debug, Clone, Default, Serialize)]
pub struct PluginDraft {
    pub plugin_key: String,
    pub name: String,
    pub plugin_type: Option<PluginType>,
    pub version: String,
    pub description: String,
    pub update_content: String,
}

/// Read a store id that may arrive as a JSON number or string.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// The store is loose with types: nulls for empty strings, numbers as strings.

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(de::Error::custom(format!(
            "expected a string, found {}",
            other
        ))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| de::Error::custom(format!("expected an integer, found {}", value)))
}
