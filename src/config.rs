//! Building graphs from configuration data.
//!
//! A configuration payload is a JSON object whose top-level members are
//! sections. Each section is handed to the [`Handler`] registered under its
//! name, which extends the [`Computer`] with `add`/`add_single`. Sections may
//! refer to each other in any order: a handler that fails is queued again
//! once, after every other handler had its first attempt.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use camino::Utf8PathBuf;
use serde::Deserialize;
use serde_json::Value as Json;

use crate::Computer;
use crate::computer::AddOptions;
use crate::error::ConfigError;
use crate::graph::Ident;
use crate::task::{Arg, Collect, Task};

/// How many times each handler call is attempted.
const MAX_TRIES: usize = 2;

/// What happens when a handler still fails after its last attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fail {
    /// Abort the whole configuration pass.
    #[default]
    Raise,
    /// Log the section and fragment, then continue with the rest.
    Log,
}

/// How a section's data is split into handler calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One call with the whole section.
    Whole,
    /// The section is a list; one call per element.
    Each,
}

pub type HandlerFn = Arc<dyn Fn(&mut Computer, &Json) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Handler {
    shape: Shape,
    func: HandlerFn,
}

impl Handler {
    pub fn shape(&self) -> Shape {
        self.shape
    }
}

impl Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("shape", &self.shape).finish()
    }
}

/// Section name → handler.
#[derive(Clone, Debug)]
pub struct Handlers {
    map: HashMap<String, Handler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self::new()
    }
}

impl Handlers {
    pub fn empty() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// The built-in sections: `default`, `alias`, `cache`, `general` and
    /// `report`.
    pub fn new() -> Self {
        let mut handlers = Self::empty();
        handlers.register("default", Shape::Whole, default);
        handlers.register("alias", Shape::Whole, alias);
        handlers.register("cache", Shape::Whole, cache);
        handlers.register("general", Shape::Each, general);
        handlers.register("report", Shape::Each, report);
        handlers
    }

    /// Registers `func` for `section`, returning the handler it replaces.
    pub fn register<F>(&mut self, section: &str, shape: Shape, func: F) -> Option<Handler>
    where
        F: Fn(&mut Computer, &Json) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = Handler {
            shape,
            func: Arc::new(func),
        };

        let old = self.map.insert(section.to_owned(), handler);
        if old.is_some() {
            tracing::warn!("Override handler for configuration section '{section}'");
        }
        old
    }

    pub fn get(&self, section: &str) -> Option<&Handler> {
        self.map.get(section)
    }

    pub fn remove(&mut self, section: &str) -> Option<Handler> {
        self.map.remove(section)
    }

    /// Every registered section name, sorted.
    pub fn sections(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.map.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

struct Call {
    section: String,
    handler: Handler,
    fragment: Json,
    tries: usize,
}

impl Computer {
    /// Applies a configuration payload.
    ///
    /// Sections without a handler are logged and ignored. With
    /// [`Fail::Log`], a handler that keeps failing is logged with its
    /// section and fragment and the remaining sections still apply.
    pub fn configure(&mut self, config: &Json, fail: Fail) -> Result<(), ConfigError> {
        let Json::Object(sections) = config else {
            return Err(ConfigError::Shape {
                section: "<root>".into(),
                expected: "an object",
            });
        };

        let mut queue = VecDeque::new();

        for (section, data) in sections {
            let Some(handler) = self.handlers.get(section).cloned() else {
                tracing::warn!("No handler for configuration section '{section}'; ignored");
                continue;
            };

            let fragments = match (handler.shape, data) {
                (Shape::Whole, data) => vec![data.clone()],
                (Shape::Each, Json::Array(items)) => items.clone(),
                (Shape::Each, _) => {
                    let err = ConfigError::Shape {
                        section: section.clone(),
                        expected: "a list",
                    };
                    match fail {
                        Fail::Raise => return Err(err),
                        Fail::Log => {
                            tracing::error!("{err}");
                            continue;
                        }
                    }
                }
            };

            queue.extend(fragments.into_iter().map(|fragment| Call {
                section: section.clone(),
                handler: handler.clone(),
                fragment,
                tries: 0,
            }));
        }

        while let Some(mut call) = queue.pop_front() {
            call.tries += 1;

            match (call.handler.func)(self, &call.fragment) {
                Ok(()) => {}
                Err(err) if call.tries < MAX_TRIES => {
                    tracing::debug!("Retrying '{}' later: {err:#}", call.section);
                    queue.push_back(call);
                }
                Err(source) => match fail {
                    Fail::Raise => {
                        return Err(ConfigError::Handler {
                            section: call.section,
                            fragment: call.fragment.to_string(),
                            source,
                        });
                    }
                    Fail::Log => {
                        tracing::error!(
                            section = %call.section,
                            fragment = %call.fragment,
                            "Configuration handler failed: {source:#}"
                        );
                    }
                },
            }
        }

        for (section, data) in sections {
            self.config.insert(section.clone(), data.clone());
        }

        Ok(())
    }
}

fn ident(text: &str) -> anyhow::Result<Ident> {
    Ident::parse(text).with_context(|| format!("Invalid key '{text}'"))
}

/// `default: <key>`
fn default(c: &mut Computer, data: &Json) -> anyhow::Result<()> {
    let key = data
        .as_str()
        .ok_or_else(|| anyhow!("expected a key, got {data}"))?;
    c.set_default_key(ident(key)?);
    Ok(())
}

/// `alias: { <new>: <existing>, ... }`
fn alias(c: &mut Computer, data: &Json) -> anyhow::Result<()> {
    let pairs: HashMap<String, String> = serde_json::from_value(data.clone())?;

    for (new, existing) in pairs {
        let new = ident(&new)?;
        if c.contains(new.clone()) {
            // already added by an earlier attempt
            continue;
        }
        c.add_alias(new, ident(&existing)?)?;
    }

    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CacheSection {
    path: Option<Utf8PathBuf>,
    skip: Option<bool>,
}

/// `cache: { path: <dir>, skip: <bool> }`
fn cache(c: &mut Computer, data: &Json) -> anyhow::Result<()> {
    let section: CacheSection = serde_json::from_value(data.clone())?;

    if let Some(path) = section.path {
        tracing::info!("Cache directory {path}");
        c.cache().set_dir(path);
    }
    if let Some(skip) = section.skip {
        c.cache().set_skip(skip);
    }

    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneralSection {
    key: String,
    comp: String,
    #[serde(default)]
    inputs: Vec<String>,
    args: Option<Json>,
}

/// `general: [{ key, comp, inputs, args }, ...]`
///
/// `comp` names an operation registered with
/// [`Computer::register_op`]; `args`, if present, is passed as a trailing
/// `serde_json::Value` argument.
fn general(c: &mut Computer, data: &Json) -> anyhow::Result<()> {
    let info: GeneralSection = serde_json::from_value(data.clone())?;

    let op = c
        .operation(&info.comp)
        .ok_or_else(|| anyhow!("No operation registered as '{}'", info.comp))?;
    let key = ident(&info.key)?;

    let mut args = info
        .inputs
        .iter()
        .map(|input| ident(input).map(Arg::Ref))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if let Some(extra) = info.args {
        args.push(Arg::literal(extra));
    }

    tracing::info!("Add '{key}' using {}", op.name());
    c.add_task(key, Task::from_arc(op, args), AddOptions::default().strict(true))?;
    Ok(())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReportSection {
    key: String,
    members: Vec<String>,
}

/// `report: [{ key, members }, ...]`; the report is the list of the
/// members' values.
fn report(c: &mut Computer, data: &Json) -> anyhow::Result<()> {
    let info: ReportSection = serde_json::from_value(data.clone())?;
    let key = ident(&info.key)?;

    let members = info
        .members
        .iter()
        .map(|member| ident(member))
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!("Add report '{key}' with {} member(s)", members.len());
    c.add_task(key, Task::new(Collect, members), AddOptions::default().strict(true))?;
    Ok(())
}
