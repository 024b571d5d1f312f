//! Enumerates tools, resources, resource templates and prompts into a [`Snapshot`].
//!
//! Each listing is independent: a failure or timeout leaves that category empty,
//! records a [`Note`] and marks the run partial, and the next listing still runs.

use std::collections::HashSet;
use std::future::Future;

use chrono::Utc;

use crate::mcp::PaginatedResult;
use crate::session::Session;
use crate::snapshot::{
    Note, NoteKind, NoteRule, PromptDescriptor, ResourceDescriptor, RunStatus, Snapshot,
    ToolDescriptor, normalize_whitespace,
};
use crate::CallError;

/// Upper bound on `nextCursor` pages followed per listing.
pub const MAX_LIST_PAGES: usize = 64;

/// A snapshot plus the listing order that sorting discards.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub snapshot: Snapshot,
    /// Resource URIs then template URIs, as the server listed them.
    pub listed_uris: Vec<String>,
}

pub async fn extract(session: &Session) -> Extraction {
    let ready = session.ready();
    let mut run = Run::default();

    let listed_tools = run.recover(
        "list_tools",
        list_all(move |cursor| session.list_tools(cursor)).await,
    );

    let (listed_resources, listed_templates) = if ready.capabilities.resources {
        let resources = run.recover(
            "list_resources",
            list_all(move |cursor| session.list_resources(cursor)).await,
        );
        let templates = run.recover(
            "list_resource_templates",
            list_all(move |cursor| session.list_resource_templates(cursor)).await,
        );
        (resources, templates)
    } else {
        tracing::debug!("server did not declare resources; skipping resource listings");
        (Vec::new(), Vec::new())
    };

    let listed_prompts = if ready.capabilities.prompts {
        run.recover(
            "list_prompts",
            list_all(move |cursor| session.list_prompts(cursor)).await,
        )
    } else {
        tracing::debug!("server did not declare prompts; skipping prompt listing");
        Vec::new()
    };

    let mut tools: Vec<ToolDescriptor> = run
        .dedup("tool", listed_tools, |tool| tool.name.clone())
        .into_iter()
        .map(|tool| ToolDescriptor::new(tool.name, tool.description, tool.input_schema))
        .collect();
    tools.sort_by(|a, b| {
        (a.risk_classification.rank(), &a.name).cmp(&(b.risk_classification.rank(), &b.name))
    });

    let concrete = listed_resources.into_iter().map(|resource| ResourceDescriptor {
        uri: resource.uri,
        description: normalize_description(resource.description),
        template: false,
    });
    let templates = listed_templates
        .into_iter()
        .map(|template| ResourceDescriptor {
            uri: template.uri_template,
            description: normalize_description(template.description),
            template: true,
        });
    let resources: Vec<ResourceDescriptor> = concrete.chain(templates).collect();
    let listed_uris = resources.iter().map(|resource| resource.uri.clone()).collect();
    let mut resources = run.dedup("resource", resources, |resource| resource.uri.clone());
    resources.sort_by(|a, b| (a.template, &a.uri).cmp(&(b.template, &b.uri)));

    let mut prompts: Vec<PromptDescriptor> = run
        .dedup("prompt", listed_prompts, |prompt| prompt.name.clone())
        .into_iter()
        .map(|prompt| PromptDescriptor {
            name: prompt.name,
            args: prompt
                .arguments
                .unwrap_or_default()
                .into_iter()
                .map(|argument| argument.name)
                .collect(),
            description: normalize_description(prompt.description),
        })
        .collect();
    prompts.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::debug!(
        tools = tools.len(),
        resources = resources.len(),
        prompts = prompts.len(),
        notes = run.notes.len(),
        "extraction finished"
    );

    let snapshot = Snapshot {
        generated_at: Utc::now(),
        scanned_command: Vec::new(),
        server_name: ready.server_name.clone(),
        server_version: ready.server_version.clone(),
        protocol_version: ready.protocol_version.clone(),
        capabilities: ready.capabilities,
        status: run.status,
        tools,
        resources,
        prompts,
        manifest: None,
        signals: Vec::new(),
        notes: run.notes,
    };
    Extraction {
        snapshot,
        listed_uris,
    }
}

#[derive(Default)]
struct Run {
    status: RunStatus,
    notes: Vec<Note>,
}

impl Run {
    fn recover<T>(&mut self, name: &str, outcome: Result<Vec<T>, CallError>) -> Vec<T> {
        match outcome {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(call = name, error = %err, "listing failed; continuing with an empty result");
                self.notes.push(Note::call_failed(name, &err));
                self.status = RunStatus::Partial;
                Vec::new()
            }
        }
    }

    /// Keeps the first entry per key; later ones become `duplicate` notes.
    fn dedup<T>(&mut self, what: &str, items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            let item_key = key(&item);
            if seen.insert(item_key.clone()) {
                kept.push(item);
            } else {
                tracing::debug!(what, key = %item_key, "dropping duplicate entry");
                self.notes.push(Note::new(
                    NoteKind::Snapshot,
                    item_key,
                    NoteRule::Duplicate,
                    format!("duplicate {what} listed by the server; kept the first"),
                ));
            }
        }
        kept
    }
}

/// Follows `nextCursor` until it runs out. Any failed page fails the whole listing.
async fn list_all<P, F, Fut>(fetch: F) -> Result<Vec<P::Item>, CallError>
where
    P: PaginatedResult,
    F: Fn(Option<String>) -> Fut,
    Fut: Future<Output = Result<P, CallError>>,
{
    let mut items = Vec::new();
    let mut cursor = None;
    for _ in 0..MAX_LIST_PAGES {
        let (mut page, next) = fetch(cursor.take()).await?.into_page();
        items.append(&mut page);
        match next {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(items),
        }
    }
    tracing::warn!(
        pages = MAX_LIST_PAGES,
        "pagination limit reached; keeping the pages read so far"
    );
    Ok(items)
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|text| normalize_whitespace(&text))
        .filter(|text| !text.is_empty())
}
