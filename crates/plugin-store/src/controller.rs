//! Request handlers over [`StoreClient`].
//!
//! Each action takes a flat string form, validates it and answers with an
//! [`ApiResponse`]. Nothing here knows about HTTP; the CLI and any server
//! front end feed actions through [`dispatch`].

use crate::error::{StoreError, StoreResult};
use crate::installer::types::{LogProgressReporter, PluginType};
use crate::store::types::PluginFilter;
use crate::store::StoreClient;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Log target of lifecycle actions performed by an operator.
pub const AUDIT_TARGET: &str = "plugin_store::audit";

pub const ACTIONS: [&str; 16] = [
    "init",
    "captcha",
    "register",
    "login",
    "plugins",
    "getUpdates",
    "delUpdates",
    "purchase",
    "install",
    "upgrade",
    "uninstall",
    "purchaseRecords",
    "unbind",
    "setServer",
    "levels",
    "bindLevel",
];

/// `{code, msg, data, ...extra}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub code: i64,
    pub msg: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: 200,
            msg: msg.into(),
            data: Value::Null,
            extra: Map::new(),
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> StoreResult<Self> {
        self.data = serde_json::to_value(data)?;
        Ok(self)
    }

    pub fn with_extra(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    pub fn from_error(err: &StoreError) -> Self {
        let mut response = Self {
            code: err.code(),
            msg: err.to_string(),
            data: Value::Null,
            extra: Map::new(),
        }
        .with_extra("kind", Value::from(err.kind()));
        if let StoreError::ExtractFailed { partial, .. } = err {
            response = response.with_extra("partial", Value::from(*partial));
        }
        response
    }

    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

/// Flat string form of one request
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    fields: BTreeMap<String, String>,
}

impl FormInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `key=value` arguments; a bare `key` gets an empty value.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> Self {
        Self::from_pairs(args.iter().map(|arg| {
            let arg = arg.as_ref();
            match arg.split_once('=') {
                Some((k, v)) => (k.trim().to_string(), v.to_string()),
                None => (arg.trim().to_string(), String::new()),
            }
        }))
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Present and non-empty, after trimming.
    pub fn optional(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, key: &str) -> StoreResult<&str> {
        self.optional(key)
            .ok_or_else(|| StoreError::ValidationFailed(format!("{} is required", key)))
    }

    pub fn int(&self, key: &str) -> StoreResult<i64> {
        parse_int(key, self.required(key)?)
    }

    pub fn int_or(&self, key: &str, default: i64) -> StoreResult<i64> {
        match self.optional(key) {
            Some(raw) => parse_int(key, raw),
            None => Ok(default),
        }
    }

    pub fn plugin_type(&self, key: &str) -> StoreResult<PluginType> {
        let raw = self.int(key)?;
        PluginType::from_i64(raw).ok_or_else(|| {
            StoreError::ValidationFailed(format!("{} is not a known plugin type: {}", key, raw))
        })
    }
}

fn parse_int(key: &str, raw: &str) -> StoreResult<i64> {
    raw.parse::<i64>()
        .map_err(|_| StoreError::ValidationFailed(format!("{} must be an integer", key)))
}

/// Run `action`; failures become error responses.
pub async fn dispatch(client: &StoreClient, action: &str, form: &FormInput) -> ApiResponse {
    log::debug!("Dispatching action {}", action);
    let result = match action {
        "init" => init(client).await,
        "captcha" => captcha(client, form).await,
        "register" => register(client, form).await,
        "login" => login(client, form).await,
        "plugins" => plugins(client, form).await,
        "getUpdates" => get_updates(client).await,
        "delUpdates" => del_updates(client).await,
        "purchase" => purchase(client, form).await,
        "install" => install(client, form).await,
        "upgrade" => upgrade(client, form).await,
        "uninstall" => uninstall(client, form).await,
        "purchaseRecords" => purchase_records(client, form).await,
        "unbind" => unbind(client, form).await,
        "setServer" => set_server(client, form).await,
        "levels" => levels(client).await,
        "bindLevel" => bind_level(client, form).await,
        other => Err(StoreError::ValidationFailed(format!(
            "unknown action {:?}",
            other
        ))),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            log::warn!("Action {} failed: {}", action, err);
            ApiResponse::from_error(&err)
        }
    }
}

pub async fn init(client: &StoreClient) -> StoreResult<ApiResponse> {
    client.ensure_authenticated()?;
    Ok(ApiResponse::ok("ok"))
}

pub async fn captcha(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let kind = form.optional("type").unwrap_or_default();
    let captcha = client.captcha(kind).await?;
    ApiResponse::ok("ok").with_data(captcha)
}

pub async fn register(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let username = form.required("username")?;
    let password = form.required("password")?;
    let code = form.required("captcha")?;
    let session = crate::store::types::SessionToken(form.required("cookie")?.to_string());

    let (_, refreshed) = client.register(username, password, code, &session).await?;
    ApiResponse::ok("success").with_data(json!({ "cookie": refreshed }))
}

pub async fn login(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let username = form.required("username")?;
    let password = form.required("password")?;
    client.login(username, password).await?;
    Ok(ApiResponse::ok("success"))
}

/// Catalog rows in `data`; `count`, `user` and `purchase` beside it.
pub async fn plugins(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let plugin_type = match form.int_or("type", -1)? {
        -1 => None,
        raw => Some(PluginType::from_i64(raw).ok_or_else(|| {
            StoreError::ValidationFailed(format!("type is not a known plugin type: {}", raw))
        })?),
    };
    let filter = PluginFilter {
        plugin_type,
        keywords: form.optional("keywords").map(str::to_string),
        page: non_negative(form.int_or("page", 1)?, "page")?,
        limit: non_negative(form.int_or("limit", 20)?, "limit")?,
        group: form.int_or("group", 0)?,
    };

    let page = client.plugins(&filter).await?;
    Ok(ApiResponse::ok("ok")
        .with_data(&page.rows)?
        .with_extra("count", Value::from(page.count))
        .with_extra("user", page.user)
        .with_extra("purchase", page.purchase))
}

pub async fn get_updates(client: &StoreClient) -> StoreResult<ApiResponse> {
    match client.get_updates().await {
        Ok(updates) => ApiResponse::ok("ok").with_data(updates),
        Err(StoreError::CacheFresh) => ApiResponse::ok("cache hit").with_data(client.cached_updates().await),
        Err(err) => Err(err),
    }
}

pub async fn del_updates(client: &StoreClient) -> StoreResult<ApiResponse> {
    client.clear_updates().await?;
    Ok(ApiResponse::ok("ok"))
}

pub async fn purchase(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let plugin_type = form.plugin_type("type")?;
    let plugin_id = form.int("plugin_id")?;
    let pay_type = form.int_or("payType", 0)?;
    let order = client.purchase(plugin_type, plugin_id, pay_type).await?;
    ApiResponse::ok("order created").with_data(order)
}

pub async fn install(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let key = form.required("plugin_key")?;
    let plugin_type = form.plugin_type("type")?;
    let plugin_id = form.int("plugin_id")?;

    client
        .install(key, plugin_type, plugin_id, &LogProgressReporter)
        .await?;
    log::info!(
        target: AUDIT_TARGET,
        "installed plugin {} (type {}, id {})",
        key,
        plugin_type.as_str(),
        plugin_id
    );
    Ok(ApiResponse::ok("installed"))
}

pub async fn upgrade(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let key = form.required("plugin_key")?;
    let plugin_type = form.plugin_type("type")?;
    let plugin_id = form.int("plugin_id")?;

    client
        .update(key, plugin_type, plugin_id, &LogProgressReporter)
        .await?;
    log::info!(
        target: AUDIT_TARGET,
        "upgraded plugin {} (type {}, id {})",
        key,
        plugin_type.as_str(),
        plugin_id
    );
    Ok(ApiResponse::ok("updated"))
}

pub async fn uninstall(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let key = form.required("plugin_key")?;
    let plugin_type = form.plugin_type("type")?;

    let removed = client.uninstall(key, plugin_type).await?;
    log::info!(
        target: AUDIT_TARGET,
        "uninstalled plugin {} (type {}, removed: {})",
        key,
        plugin_type.as_str(),
        removed
    );
    ApiResponse::ok("uninstalled").with_data(json!({ "removed": removed }))
}

pub async fn purchase_records(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let records = client.purchase_records(form.int("plugin_id")?).await?;
    ApiResponse::ok("ok").with_data(records)
}

pub async fn unbind(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let auth_id = form.int("auth_id")?;
    client.unbind(auth_id).await?;
    log::info!(target: AUDIT_TARGET, "unbound license {}", auth_id);
    Ok(ApiResponse::ok("license unbound"))
}

pub async fn set_server(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let server = non_negative(form.int("server")?, "server")?;
    client.set_server(server).await?;
    log::info!(target: AUDIT_TARGET, "switched store route to {}", server);
    Ok(ApiResponse::ok("route switched"))
}

pub async fn levels(client: &StoreClient) -> StoreResult<ApiResponse> {
    ApiResponse::ok("ok").with_data(client.levels().await?)
}

pub async fn bind_level(client: &StoreClient, form: &FormInput) -> StoreResult<ApiResponse> {
    let auth_id = form.int("auth_id")?;
    client.bind_level(auth_id).await?;
    log::info!(target: AUDIT_TARGET, "bound license {} to the store level", auth_id);
    Ok(ApiResponse::ok("license bound"))
}

fn non_negative(value: i64, key: &str) -> StoreResult<u32> {
    u32::try_from(value)
        .map_err(|_| StoreError::ValidationFailed(format!("{} must not be negative", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreSettings;
    use crate::installer::hooks::HookRegistry;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn offline_client() -> (TempDir, StoreClient) {
        let tmp = tempfile::tempdir().unwrap();
        let client =
            StoreClient::new(StoreSettings::new(tmp.path()), Arc::new(HookRegistry::new()), None)
                .await
                .unwrap();
        (tmp, client)
    }

    #[test]
    fn form_rejects_missing_and_blank_fields() {
        let form = FormInput::parse_args(&["username=alice", "password=  ", "flag"]);
        assert_eq!(form.required("username").unwrap(), "alice");
        assert!(matches!(
            form.required("password"),
            Err(StoreError::ValidationFailed(_))
        ));
        assert!(form.optional("flag").is_none());
        assert!(form.required("captcha").is_err());
    }

    #[test]
    fn form_parses_integers_and_plugin_types() {
        let form = FormInput::new()
            .set("plugin_id", "12")
            .set("type", "2")
            .set("bad", "x1")
            .set("weird", "9");
        assert_eq!(form.int("plugin_id").unwrap(), 12);
        assert_eq!(form.plugin_type("type").unwrap(), PluginType::Theme);
        assert!(form.int("bad").is_err());
        assert!(form.plugin_type("weird").is_err());
        assert_eq!(form.int_or("page", 1).unwrap(), 1);
    }

    #[test]
    fn error_responses_carry_code_and_kind() {
        let response = ApiResponse::from_error(&StoreError::ExtractFailed {
            key: "Demo".to_string(),
            partial: true,
            reason: "disk full".to_string(),
        });
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["code"], 500);
        assert_eq!(value["kind"], "extract_failed");
        assert_eq!(value["partial"], true);
        assert!(value.get("data").is_none());
    }

    #[tokio::test]
    async fn init_without_credentials_is_not_authenticated() {
        let (_tmp, client) = offline_client().await;
        let response = dispatch(&client, "init", &FormInput::new()).await;
        assert_eq!(response.code, 401);
        assert_eq!(response.extra["kind"], "not_authenticated");
    }

    #[tokio::test]
    async fn missing_fields_fail_validation_before_any_call() {
        let (_tmp, client) = offline_client().await;
        for action in ["register", "login", "install", "upgrade", "uninstall", "unbind", "bindLevel", "setServer", "purchaseRecords"] {
            let response = dispatch(&client, action, &FormInput::new()).await;
            assert_eq!(response.code, 400, "action {}", action);
            assert_eq!(response.extra["kind"], "validation_failed");
        }
    }

    #[tokio::test]
    async fn unknown_action_is_rejected() {
        let (_tmp, client) = offline_client().await;
        let response = dispatch(&client, "selfDestruct", &FormInput::new()).await;
        assert_eq!(response.code, 400);
    }

    #[tokio::test]
    async fn uninstall_of_absent_plugin_succeeds() {
        let (_tmp, client) = offline_client().await;
        let form = FormInput::new().set("plugin_key", "Ghost").set("type", "0");
        let response = dispatch(&client, "uninstall", &form).await;
        assert!(response.is_success());
        assert_eq!(response.data, json!({"removed": false}));
    }

    #[tokio::test]
    async fn fresh_update_cache_is_served_as_cache_hit() {
        let (tmp, client) = offline_client().await;
        let path = StoreSettings::new(tmp.path()).update_cache_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            json!({"Demo": {"icon": "", "name": "Demo", "version": "1.2", "update_content": "", "id": 5, "type": 0}})
                .to_string(),
        )
        .unwrap();

        let response = dispatch(&client, "getUpdates", &FormInput::new()).await;
        assert!(response.is_success());
        assert_eq!(response.msg, "cache hit");
        assert_eq!(response.data["Demo"]["version"], "1.2");

        let cleared = dispatch(&client, "delUpdates", &FormInput::new()).await;
        assert!(cleared.is_success());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn set_server_persists_the_route() {
        let (tmp, client) = offline_client().await;
        let response = dispatch(&client, "setServer", &FormInput::new().set("server", "1")).await;
        assert!(response.is_success());
        assert_eq!(client.credentials().server, 1);

        let on_disk = std::fs::read_to_string(StoreSettings::new(tmp.path()).credentials_path()).unwrap();
        assert!(on_disk.contains("\"server\": 1"));

        let negative = dispatch(&client, "setServer", &FormInput::new().set("server", "-1")).await;
        assert_eq!(negative.code, 400);
    }
}
