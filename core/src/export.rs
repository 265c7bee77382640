//! App export and import.
//!
//! An export bundles an app with everything its pages reference: the
//! actionflows and questionnaires triggered by module actions, the import
//! entries of its collections, and the versions of the source environment.
//! The bundle can be imported into another environment through
//! `POST /transfer/app`.

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::client::Client;
use crate::error::ApiError;
use crate::http::{HttpMethod, Transport};
use crate::resources::{Actionflow, App, Questionnaire};
use crate::types::{ApiResponse, Envelope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppExport {
    pub apps: Vec<App>,
    pub collections: Value,
    pub form_templates: Vec<Questionnaire>,
    pub action_flows: Vec<Actionflow>,
    pub import_entry: Vec<Value>,
    pub config: ExportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub timestamp: i64,
    pub created_by: String,
    /// Host name of the source environment.
    #[serde(rename = "enviroment")]
    pub environment: String,
    pub api_version: Option<String>,
    pub web_application_version: Option<String>,
    pub web_server_version: Option<String>,
    pub deployable: bool,
}

fn children<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

/// Actions configured on the modules of every page of `groups`.
fn module_actions(groups: &Value) -> Vec<&Value> {
    groups
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|group| children(group, "pages"))
        .flat_map(|page| children(page, "rows"))
        .flat_map(|row| children(row, "modules"))
        .filter_map(|module| module.get("selection"))
        .flat_map(|selection| children(selection, "actions"))
        .collect()
}

/// Ids referenced by actions of kind `kind` under `key.id`, deduplicated.
fn referenced_ids(actions: &[&Value], kind: &str, key: &str) -> BTreeSet<i64> {
    actions
        .iter()
        .filter(|a| a.get("type").and_then(Value::as_str) == Some(kind))
        .filter_map(|a| a.get(key)?.get("id")?.as_i64())
        .collect()
}

fn collection_slugs(collections: &Value) -> BTreeSet<&str> {
    collections
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|c| c.get("slug").and_then(Value::as_str))
        .collect()
}

/// Host name of the environment at `base_url`.
fn host_of(base_url: &str) -> Result<String, ApiError> {
    let url = Url::parse(base_url)
        .map_err(|e| ApiError::Config(format!("base url '{base_url}': {e}")))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| ApiError::Config(format!("base url '{base_url}' has no host")))
}

impl<T: Transport> Client<T> {
    pub fn export_app(&self, app: &App) -> Result<AppExport, ApiError> {
        app.require_id()?;
        let app = self.get(&app.clone().with_extended(true))?.into_one()?;
        let groups = app.groups.clone().unwrap_or(Value::Null);
        let actions = module_actions(&groups);

        let action_flows = referenced_ids(&actions, "actionflow", "actionflowId")
            .into_iter()
            .map(|id| self.get(&Actionflow::with_id(id))?.into_one())
            .collect::<Result<Vec<_>, _>>()?;
        let form_templates = referenced_ids(&actions, "questionnaire", "template")
            .into_iter()
            .map(|id| self.get(&Questionnaire::with_id(id))?.into_one())
            .collect::<Result<Vec<_>, _>>()?;

        let collections = app.collections.clone().unwrap_or(Value::Array(Vec::new()));
        let slugs = collection_slugs(&collections);
        let entries = self
            .private_request::<()>(HttpMethod::Get, "/import?extended=true", None)?
            .into_data()?;
        let import_entry = entries
            .as_array()
            .into_iter()
            .flatten()
            .filter(|e| {
                e.get("collection")
                    .and_then(Value::as_str)
                    .is_some_and(|slug| slugs.contains(slug))
            })
            .cloned()
            .collect();

        let environment = host_of(&self.config().base_url)?;
        let version = self.version()?;
        tracing::info!(
            app = app.id.as_deref().unwrap_or_default(),
            action_flows = action_flows.len(),
            form_templates = form_templates.len(),
            "exported app"
        );
        Ok(AppExport {
            config: ExportConfig {
                timestamp: Utc::now().timestamp(),
                created_by: self.config().credentials.username().to_string(),
                environment,
                api_version: version.api,
                web_application_version: version.web_application,
                web_server_version: version.web_server,
                deployable: true,
            },
            apps: vec![app],
            collections,
            form_templates,
            action_flows,
            import_entry,
        })
    }

    /// Import an exported app. `data_export` asks the server to also replace
    /// the collections' data.
    pub fn import_app(&self, export: &AppExport, data_export: bool) -> Result<ApiResponse, ApiError> {
        if !export.config.deployable {
            return Err(ApiError::Precondition("app is not deployable".to_string()));
        }
        let mut body =
            serde_json::to_value(export).map_err(|e| ApiError::Serialization(e.to_string()))?;
        if let Value::Object(map) = &mut body {
            map.remove("config");
            map.insert("delete_mongo_data".to_string(), Value::Bool(data_export));
        }
        self.private_request(HttpMethod::Post, "/transfer/app", Some(&body))
            .map(Envelope::into_api_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::testing::ScriptedTransport;
    use serde_json::json;

    fn groups() -> Value {
        json!([{
            "pages": [{
                "rows": [{
                    "modules": [
                        {"selection": {"actions": [
                            {"type": "actionflow", "actionflowId": {"id": 5}},
                            {"type": "actionflow", "actionflowId": null},
                            {"type": "questionnaire", "template": {"id": 9}},
                        ]}},
                        {"selection": {}},
                        {"selection": {"actions": [
                            {"type": "actionflow", "actionflowId": {"id": 5}},
                            {"type": "link", "href": "/x"},
                        ]}},
                    ]
                }]
            }]
        }])
    }

    #[test]
    fn actions_are_collected_from_every_module() {
        let g = groups();
        let actions = module_actions(&g);
        assert_eq!(actions.len(), 5);
        assert_eq!(
            referenced_ids(&actions, "actionflow", "actionflowId"),
            BTreeSet::from([5])
        );
        assert_eq!(
            referenced_ids(&actions, "questionnaire", "template"),
            BTreeSet::from([9])
        );
        assert!(module_actions(&json!(3)).is_empty());
    }

    #[test]
    fn host_is_taken_from_base_url() {
        assert_eq!(host_of("https://app.clappform.com").unwrap(), "app.clappform.com");
        assert_eq!(host_of("http://127.0.0.1:3000/").unwrap(), "127.0.0.1");
        assert_eq!(host_of("http://user:pw@dev.clappform.com:8443/x").unwrap(), "dev.clappform.com");
        assert_eq!(host_of("http://[::1]:3000").unwrap(), "[::1]");
    }

    #[test]
    fn unparsable_base_url_is_a_config_error() {
        assert!(matches!(host_of("localhost"), Err(ApiError::Config(_))));
        assert!(matches!(host_of("data:text/plain,x"), Err(ApiError::Config(_))));
    }

    #[test]
    fn export_assembles_referenced_resources() {
        let transport = ScriptedTransport::new();
        transport.respond_login(Utc::now().timestamp() + 3600);
        let c = Client::with_transport(
            ClientConfig::new("https://dev.clappform.com", "j.doe@clappform.com", "p"),
            &transport,
        );
        transport.respond_data(json!({
            "id": "sales", "name": "Sales",
            "collections": [{"slug": "orders"}],
            "groups": groups(),
        }));
        transport.respond_data(json!({"id": 5, "name": "Nightly"}));
        transport.respond_data(json!({"id": 9, "name": "Intake"}));
        transport.respond_data(json!([
            {"collection": "orders", "id": 1},
            {"collection": "other", "id": 2},
        ]));
        transport.respond_data(json!({"api": "7.1", "web_application": "7.2", "web_server": "7.3"}));

        let export = c.export_app(&App::with_id("sales")).unwrap();
        assert_eq!(
            transport.paths()[1..].to_vec(),
            vec![
                "/app/sales?extended=true",
                "/actionflow/5",
                "/questionnaire/9?extended=false",
                "/import?extended=true",
                "/version",
            ]
        );
        assert_eq!(export.action_flows[0].name.as_deref(), Some("Nightly"));
        assert_eq!(export.form_templates[0].id, Some(9));
        assert_eq!(export.import_entry, vec![json!({"collection": "orders", "id": 1})]);
        assert_eq!(export.config.environment, "dev.clappform.com");
        assert_eq!(export.config.created_by, "j.doe@clappform.com");
        assert_eq!(export.config.api_version.as_deref(), Some("7.1"));
        assert!(export.config.deployable);

        let wire = serde_json::to_value(&export.config).unwrap();
        assert_eq!(wire["enviroment"], "dev.clappform.com");
    }

    fn sample_export(deployable: bool) -> AppExport {
        AppExport {
            apps: vec![App::with_id("sales")],
            collections: json!([]),
            form_templates: Vec::new(),
            action_flows: Vec::new(),
            import_entry: Vec::new(),
            config: ExportConfig {
                timestamp: 0,
                created_by: "u".to_string(),
                environment: "dev".to_string(),
                api_version: None,
                web_application_version: None,
                web_server_version: None,
                deployable,
            },
        }
    }

    #[test]
    fn import_posts_bundle_without_config() {
        let transport = ScriptedTransport::new();
        transport.respond_login(Utc::now().timestamp() + 3600);
        transport.respond(200, json!({"code": 200, "message": "Imported", "response_id": "i"}));
        let c = Client::with_transport(ClientConfig::new("http://h", "u", "p"), &transport);

        let resp = c.import_app(&sample_export(true), true).unwrap();
        assert_eq!(resp.message, "Imported");
        assert_eq!(transport.paths()[1], "/transfer/app");
        let body = transport.body(1);
        assert!(body.get("config").is_none());
        assert_eq!(body["delete_mongo_data"], true);
        assert_eq!(body["apps"][0]["id"], "sales");
    }

    #[test]
    fn non_deployable_export_is_refused() {
        let transport = ScriptedTransport::new();
        let c = Client::with_transport(ClientConfig::new("http://h", "u", "p"), &transport);
        let err = c.import_app(&sample_export(false), false).unwrap_err();
        assert!(matches!(err, ApiError::Precondition(_)));
        assert!(transport.requests().is_empty());
    }
}
