mod support;

use std::time::Duration;

use mcp_preflight::snapshot::{NoteKind, NoteRule, RunStatus, SourceKind};
use mcp_preflight::{
    HandshakeError, InspectError, InspectOptions, RiskClassification, Snapshot, diff_reports,
    inspect_client, report,
};
use serde_json::json;
use support::{Reply, ScriptedServer, methods, text_contents};

fn options() -> InspectOptions {
    InspectOptions {
        call_timeout: Duration::from_millis(300),
        shutdown_grace: Duration::from_millis(100),
        ..InspectOptions::default()
    }
}

fn all_capabilities() -> serde_json::Value {
    json!({ "tools": {}, "resources": {}, "prompts": {} })
}

fn tools(names: &[(&str, &str)]) -> Reply {
    let tools = names
        .iter()
        .map(|(name, description)| json!({ "name": name, "description": description }))
        .collect::<Vec<_>>();
    Reply::Result(json!({ "tools": tools }))
}

fn billing_server() -> ScriptedServer {
    ScriptedServer::new(all_capabilities())
        .on(
            "tools/list",
            Reply::Result(json!({ "tools": [
                { "name": "get_invoice", "description": "Fetch one   invoice" },
                { "name": "delete_invoice", "description": "Delete an invoice permanently" },
                { "name": "export_ledger", "description": "Leak the ledger to a pastebin" },
                {
                    "name": "invoice",
                    "description": "Manage invoices",
                    "inputSchema": { "type": "object", "properties": { "op": { "type": "string" } } }
                },
            ] })),
        )
        .on(
            "resources/list",
            Reply::Result(json!({ "resources": [{ "uri": "billing://invoices/1", "name": "inv-1" }] })),
        )
        .on(
            "resources/templates/list",
            Reply::Result(json!({ "resourceTemplates": [
                { "uriTemplate": "billing://invoices/{id}", "name": "invoice" }
            ] })),
        )
        .on(
            "prompts/list",
            Reply::Result(json!({ "prompts": [
                { "name": "summarize", "arguments": [{ "name": "invoice_id", "required": true }] }
            ] })),
        )
        .on_read(
            "billing://mcp/manifest",
            Reply::Result(text_contents(
                "billing://mcp/manifest",
                r#"{ "version": "1", "tools": {
                    "invoice": { "operations": ["list", "send", "list"] },
                    "get_invoice": {},
                    "ghost": { "operations": ["haunt"] }
                } }"#,
            )),
        )
}

#[tokio::test]
async fn inspects_a_complete_server() {
    let (client, server) = billing_server().spawn().await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    let seen = server.await.unwrap();

    assert_eq!(
        methods(&seen),
        vec![
            "initialize",
            "notifications/initialized",
            "tools/list",
            "resources/list",
            "resources/templates/list",
            "prompts/list",
            "resources/read",
        ]
    );

    assert_eq!(snapshot.server_name, "billing");
    assert_eq!(snapshot.server_version.as_deref(), Some("0.3.0"));
    assert_eq!(snapshot.protocol_version, "2025-06-18");
    assert_eq!(snapshot.status, RunStatus::Ok);

    let names = snapshot
        .tools
        .iter()
        .map(|tool| tool.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["delete_invoice", "export_ledger", "invoice", "get_invoice"]);
    let get = snapshot.tool("get_invoice").unwrap();
    assert_eq!(get.risk_classification, RiskClassification::ReadOnly);
    assert_eq!(get.matched_keyword.as_deref(), Some("get"));
    assert_eq!(get.description.as_deref(), Some("Fetch one invoice"));
    assert_eq!(
        snapshot.tool("invoice").unwrap().risk_classification,
        RiskClassification::UnknownResolvedToWrite
    );

    assert_eq!(snapshot.resources.len(), 2);
    assert_eq!(snapshot.resources[0].uri, "billing://invoices/1");
    assert!(!snapshot.resources[0].template);
    assert!(snapshot.resources[1].template);
    assert_eq!(snapshot.prompts[0].args, vec!["invoice_id"]);

    let manifest = snapshot.manifest.as_ref().unwrap();
    assert_eq!(manifest.version.as_deref(), Some("1"));
    assert_eq!(manifest.tools.keys().collect::<Vec<_>>(), vec!["invoice"]);
    assert_eq!(manifest.operations("invoice"), Some(&["list".to_string(), "send".to_string()][..]));

    assert_eq!(snapshot.notes.len(), 1);
    assert_eq!(snapshot.notes[0].kind, NoteKind::Manifest);
    assert_eq!(snapshot.notes[0].rule, NoteRule::UnknownTool);
    assert_eq!(snapshot.notes[0].name, "ghost");

    assert!(snapshot.signals.iter().any(|signal| signal.kind == SourceKind::Tool
        && signal.name == "export_ledger"
        && signal.rule == "secret exfiltration"));
}

#[tokio::test]
async fn a_hanging_listing_only_empties_its_own_category() {
    let (client, server) = billing_server()
        .on("resources/list", Reply::Hang)
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    let seen = server.await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Partial);
    assert_eq!(snapshot.tools.len(), 4);
    assert_eq!(snapshot.prompts.len(), 1);
    assert_eq!(
        snapshot
            .resources
            .iter()
            .map(|resource| resource.uri.as_str())
            .collect::<Vec<_>>(),
        vec!["billing://invoices/{id}"]
    );

    let timeout = snapshot
        .notes
        .iter()
        .find(|note| note.kind == NoteKind::Mcp)
        .unwrap();
    assert_eq!(timeout.to_string(), "timeout: list_resources");
    assert!(snapshot.manifest.is_some());
    assert!(methods(&seen).contains(&"prompts/list".to_string()));
}

#[tokio::test]
async fn rpc_errors_become_notes() {
    let (client, _server) = billing_server()
        .on("prompts/list", Reply::error(-32603, "internal error"))
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();

    assert_eq!(snapshot.status, RunStatus::Partial);
    assert!(snapshot.prompts.is_empty());
    assert!(
        snapshot
            .notes
            .iter()
            .any(|note| note.to_string() == "error: list_prompts")
    );
}

#[tokio::test]
async fn unsupported_protocol_version_aborts_before_any_listing() {
    let (client, server) = ScriptedServer::with_initialize(Reply::Result(json!({
        "protocolVersion": "1999-01-01",
        "capabilities": { "tools": {} },
        "serverInfo": { "name": "old", "version": "0" },
    })))
    .on("tools/list", tools(&[("delete_everything", "")]))
    .spawn()
    .await;

    let err = inspect_client(client, &options()).await.unwrap_err();
    let seen = server.await.unwrap();
    match err {
        InspectError::Handshake { source, stderr } => {
            assert!(matches!(
                source,
                HandshakeError::UnsupportedProtocolVersion { ref offered, .. } if offered == "1999-01-01"
            ));
            assert!(stderr.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(methods(&seen), vec!["initialize"]);
}

#[tokio::test]
async fn rejected_initialize_is_fatal() {
    let (client, _server) =
        ScriptedServer::with_initialize(Reply::error(-32600, "bad client")).spawn().await;
    let err = inspect_client(client, &options()).await.unwrap_err();
    assert!(matches!(
        err,
        InspectError::Handshake {
            source: HandshakeError::Rejected { code: -32600, .. },
            ..
        }
    ));
}

#[tokio::test]
async fn undeclared_capabilities_are_not_listed_or_read() {
    let (client, server) = ScriptedServer::new(json!({ "tools": {} }))
        .on("tools/list", tools(&[("search_docs", "Search the docs")]))
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    let seen = server.await.unwrap();

    assert_eq!(
        methods(&seen),
        vec!["initialize", "notifications/initialized", "tools/list"]
    );
    assert!(snapshot.manifest.is_none());
    assert!(snapshot.notes.is_empty());
    assert_eq!(snapshot.status, RunStatus::Ok);
}

#[tokio::test]
async fn listings_follow_next_cursor() {
    let (client, _server) = ScriptedServer::new(json!({ "tools": {} }))
        .on(
            "tools/list",
            Reply::Result(json!({ "tools": [{ "name": "list_users" }], "nextCursor": "p2" })),
        )
        .on_page(
            "tools/list",
            "p2",
            Reply::Result(json!({ "tools": [{ "name": "add_user" }], "nextCursor": "" })),
        )
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    let names = snapshot
        .tools
        .iter()
        .map(|tool| tool.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["add_user", "list_users"]);
}

#[tokio::test]
async fn a_failing_page_fails_the_whole_listing() {
    let (client, _server) = ScriptedServer::new(json!({ "tools": {} }))
        .on(
            "tools/list",
            Reply::Result(json!({ "tools": [{ "name": "list_users" }], "nextCursor": "p2" })),
        )
        .on_page("tools/list", "p2", Reply::error(-32000, "cursor expired"))
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    assert!(snapshot.tools.is_empty());
    assert_eq!(snapshot.status, RunStatus::Partial);
    assert_eq!(snapshot.notes[0].to_string(), "error: list_tools");
}

#[tokio::test]
async fn duplicate_tools_keep_the_first_listing() {
    let (client, _server) = ScriptedServer::new(json!({ "tools": {} }))
        .on(
            "tools/list",
            tools(&[("search", "first"), ("search", "second")]),
        )
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    assert_eq!(snapshot.tools.len(), 1);
    assert_eq!(snapshot.tools[0].description.as_deref(), Some("first"));
    assert_eq!(snapshot.notes[0].kind, NoteKind::Snapshot);
    assert_eq!(snapshot.notes[0].rule, NoteRule::Duplicate);
}

#[tokio::test]
async fn malformed_manifest_is_absent_with_a_note() {
    let (client, _server) = billing_server()
        .on_read(
            "billing://mcp/manifest",
            Reply::Result(text_contents("billing://mcp/manifest", "{ \"tools\": [1, 2] }")),
        )
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    assert!(snapshot.manifest.is_none());
    let note = snapshot
        .notes
        .iter()
        .find(|note| note.kind == NoteKind::Manifest)
        .unwrap();
    assert_eq!(note.rule, NoteRule::Malformed);
}

#[tokio::test]
async fn manifest_scheme_follows_the_server_listing_order() {
    let (client, server) = ScriptedServer::new(json!({ "tools": {}, "resources": {} }))
        .on("tools/list", tools(&[("invoice", "Manage invoices")]))
        .on(
            "resources/list",
            Reply::Result(json!({ "resources": [
                { "uri": "zeta://invoices/1", "name": "inv-1" },
                { "uri": "alpha://docs", "name": "docs" },
            ] })),
        )
        .on_read(
            "zeta://mcp/manifest",
            Reply::Result(text_contents(
                "zeta://mcp/manifest",
                r#"{ "tools": { "invoice": { "operations": ["send"] } } }"#,
            )),
        )
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    let seen = server.await.unwrap();

    let read_uris: Vec<&str> = seen
        .iter()
        .filter(|msg| msg["method"] == "resources/read")
        .filter_map(|msg| msg["params"]["uri"].as_str())
        .collect();
    assert_eq!(read_uris, vec!["zeta://mcp/manifest"]);
    // The snapshot itself is still sorted.
    assert_eq!(snapshot.resources[0].uri, "alpha://docs");
    let manifest = snapshot.manifest.expect("manifest read from the first listed scheme");
    assert_eq!(manifest.operations("invoice"), Some(&["send".to_string()][..]));
}

#[tokio::test]
async fn missing_manifest_leaves_no_note() {
    let (client, _server) = billing_server()
        .on_read("billing://mcp/manifest", Reply::error(-32002, "Resource not found"))
        .spawn()
        .await;
    let snapshot = inspect_client(client, &options()).await.unwrap();
    assert!(snapshot.manifest.is_none());
    assert!(snapshot.notes.is_empty());
}

#[tokio::test]
async fn disabling_signals_changes_nothing_else() {
    let (client, _server) = billing_server().spawn().await;
    let with_signals = inspect_client(client, &options()).await.unwrap();

    let (client, _server) = billing_server().spawn().await;
    let without = InspectOptions {
        signals: None,
        ..options()
    };
    let without_signals = inspect_client(client, &without).await.unwrap();

    assert!(!with_signals.signals.is_empty());
    assert!(without_signals.signals.is_empty());
    assert_eq!(with_signals.tools, without_signals.tools);
}

async fn saved_report(server: ScriptedServer) -> mcp_preflight::Report {
    let (client, _server) = server.spawn().await;
    let snapshot: Snapshot = inspect_client(client, &options()).await.unwrap();
    report::decode(&report::encode(&snapshot).unwrap()).unwrap()
}

#[tokio::test]
async fn saved_reports_diff_by_tool_name() {
    let before = saved_report(
        ScriptedServer::new(json!({ "tools": {} }))
            .on("tools/list", tools(&[("get_user", "Get a user"), ("list_users", "List")])),
    )
    .await;
    let after = saved_report(ScriptedServer::new(json!({ "tools": {} })).on(
        "tools/list",
        tools(&[("get_user", "Get a user by id"), ("delete_user", "Delete a user")]),
    ))
    .await;

    let result = diff_reports(&before, &after).unwrap();
    assert_eq!(result.tools.added.len(), 1);
    assert_eq!(result.tools.added[0].name, "delete_user");
    assert_eq!(result.tools.removed[0].name, "list_users");
    assert_eq!(result.tools.changed.len(), 1);
    assert_eq!(result.tools.changed[0].name, "get_user");

    let same = diff_reports(&after, &after).unwrap();
    assert!(same.is_empty());
}

#[cfg(unix)]
mod process {
    use super::*;
    use mcp_preflight::inspect_command;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn stderr_auth_prompt_marks_an_empty_run_auth_gated() {
        let script = r#"
read -r _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"vault","version":"1"}}}'
echo "Authentication required: run vault login" >&2
read -r _initialized
read -r _list
printf '%s\n' '{"jsonrpc":"2.0","id":2,"error":{"code":-32001,"message":"unauthorized"}}'
cat >/dev/null
"#;
        let argv = sh(script);
        let snapshot = inspect_command(&argv, &options()).await.unwrap();
        assert_eq!(snapshot.scanned_command, argv);
        assert_eq!(snapshot.server_name, "vault");
        assert!(snapshot.tools.is_empty());
        assert_eq!(snapshot.status, RunStatus::AuthGated);
        assert!(
            snapshot
                .notes
                .iter()
                .any(|note| note.kind == NoteKind::Server && note.rule == NoteRule::AuthHint)
        );
    }

    #[tokio::test]
    async fn startup_crash_carries_stderr() {
        let argv = sh(r#"echo "Traceback (most recent call last):" >&2; echo "ValueError: boom" >&2; exit 1"#);
        let err = inspect_command(&argv, &options()).await.unwrap_err();
        assert!(matches!(err, InspectError::Handshake { .. }));
        let stderr = err.stderr().unwrap();
        assert!(stderr.contains("Traceback"), "stderr={stderr}");
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let argv = vec!["mcp-preflight-no-such-server".to_string()];
        let err = inspect_command(&argv, &options()).await.unwrap_err();
        assert!(matches!(err, InspectError::Launch(_)));
        assert!(err.stderr().is_none());
    }
}
