//! # Function Registry
//!
//! Named apply functions, resolved from configuration at run time

use crate::{ApplyFunction, ConsumeConfig, ConsumeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arguments bound to a registered function when it is resolved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyArgs {
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    /// Keyword arguments
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl ApplyArgs {
    /// Arguments configured for a consume run
    pub fn from_config(config: &ConsumeConfig) -> Self {
        Self {
            args: config.apply_function_args.clone(),
            kwargs: config.apply_function_kwargs.clone(),
        }
    }

    pub fn arg(&self, index: usize) -> Option<&serde_json::Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&serde_json::Value> {
        self.kwargs.get(name)
    }

    /// String keyword argument
    pub fn kwarg_str(&self, name: &str) -> Option<&str> {
        self.kwarg(name).and_then(serde_json::Value::as_str)
    }
}

type SharedMessageFn<M> = Arc<dyn Fn(&M, &ApplyArgs) -> anyhow::Result<()> + Send + Sync>;
type SharedBatchFn<M> = Arc<dyn Fn(&[M], &ApplyArgs) -> anyhow::Result<()> + Send + Sync>;

/// Whether a function takes single messages or whole batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Message,
    Batch,
}

impl std::fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FunctionKind::Message => f.write_str("message"),
            FunctionKind::Batch => f.write_str("batch"),
        }
    }
}

enum Registered<M> {
    Message(SharedMessageFn<M>),
    Batch(SharedBatchFn<M>),
}

impl<M> Registered<M> {
    fn kind(&self) -> FunctionKind {
        match self {
            Registered::Message(_) => FunctionKind::Message,
            Registered::Batch(_) => FunctionKind::Batch,
        }
    }
}

/// Apply functions by name
pub struct FunctionRegistry<M> {
    functions: BTreeMap<String, Registered<M>>,
}

impl<M: 'static> FunctionRegistry<M> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { functions: BTreeMap::new() }
    }

    /// Register a per-message function, replacing any previous entry
    pub fn register_message<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&M, &ApplyArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Registered::Message(Arc::new(f)));
        self
    }

    /// Register a per-batch function, replacing any previous entry
    pub fn register_batch<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[M], &ApplyArgs) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Registered::Batch(Arc::new(f)));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn kind_of(&self, name: &str) -> Option<FunctionKind> {
        self.functions.get(name).map(Registered::kind)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = (&str, FunctionKind)> {
        self.functions.iter().map(|(name, f)| (name.as_str(), f.kind()))
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Resolve `name` as a function of `kind` with `args` bound
    pub fn resolve(
        &self,
        name: &str,
        kind: FunctionKind,
        args: ApplyArgs,
    ) -> Result<ApplyFunction<M>, ConsumeError> {
        let registered = self
            .functions
            .get(name)
            .ok_or_else(|| ConsumeError::UnknownFunction(name.to_string()))?;

        match (registered, kind) {
            (Registered::Message(f), FunctionKind::Message) => {
                let f = Arc::clone(f);
                Ok(ApplyFunction::per_message(move |message: &M| f(message, &args)))
            }
            (Registered::Batch(f), FunctionKind::Batch) => {
                let f = Arc::clone(f);
                Ok(ApplyFunction::per_batch(move |batch: &[M]| f(batch, &args)))
            }
            (registered, expected) => Err(ConsumeError::WrongFunctionKind {
                name: name.to_string(),
                expected,
                found: registered.kind(),
            }),
        }
    }

    /// Resolve whichever apply function `config` names
    ///
    /// Neither set resolves to [`ApplyFunction::None`].
    pub fn resolve_config(&self, config: &ConsumeConfig) -> Result<ApplyFunction<M>, ConsumeError> {
        let args = ApplyArgs::from_config(config);
        match (&config.apply_function, &config.apply_function_batch) {
            (Some(_), Some(_)) => Err(crate::ConfigError::ConflictingApplyFunctions.into()),
            (Some(name), None) => self.resolve(name, FunctionKind::Message, args),
            (None, Some(name)) => self.resolve(name, FunctionKind::Batch, args),
            (None, None) => Ok(ApplyFunction::None),
        }
    }
}

impl<M: 'static> Default for FunctionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> std::fmt::Debug for FunctionRegistry<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registry(log: Arc<Mutex<Vec<String>>>) -> FunctionRegistry<String> {
        let mut registry = FunctionRegistry::new();
        let message_log = Arc::clone(&log);
        registry.register_message("tag", move |message: &String, args: &ApplyArgs| {
            let prefix = args.kwarg_str("prefix").unwrap_or("");
            message_log.lock().unwrap().push(format!("{prefix}{message}"));
            Ok(())
        });
        registry.register_batch("count", move |batch: &[String], _: &ApplyArgs| {
            log.lock().unwrap().push(batch.len().to_string());
            Ok(())
        });
        registry
    }

    #[test]
    fn test_resolve_binds_kwargs() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(Arc::clone(&log));

        let mut args = ApplyArgs::default();
        args.kwargs.insert("prefix".to_string(), serde_json::json!("> "));
        let mut apply = registry.resolve("tag", FunctionKind::Message, args).unwrap();

        apply.apply(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["> a".to_string(), "> b".to_string()]);
    }

    #[test]
    fn test_resolve_unknown_name() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let err = registry
            .resolve("missing", FunctionKind::Message, ApplyArgs::default())
            .unwrap_err();

        assert!(matches!(err, ConsumeError::UnknownFunction(ref name) if name == "missing"));
    }

    #[test]
    fn test_resolve_wrong_kind() {
        let registry = registry(Arc::new(Mutex::new(Vec::new())));
        let err = registry
            .resolve("count", FunctionKind::Message, ApplyArgs::default())
            .unwrap_err();

        assert!(matches!(
            err,
            ConsumeError::WrongFunctionKind {
                expected: FunctionKind::Message,
                found: FunctionKind::Batch,
                ..
            }
        ));
    }

    #[test]
    fn test_resolve_config() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(Arc::clone(&log));

        let mut config = ConsumeConfig::for_topics(["events"]);
        assert_eq!(registry.resolve_config(&config).unwrap().mode(), "none");

        config.apply_function_batch = Some("count".to_string());
        let mut apply = registry.resolve_config(&config).unwrap();
        apply.apply(&vec!["x".to_string(); 3]).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["3".to_string()]);

        config.apply_function = Some("tag".to_string());
        assert!(registry.resolve_config(&config).is_err());
    }

    #[test]
    fn test_names_sorted_and_replaced() {
        let mut registry = registry(Arc::new(Mutex::new(Vec::new())));
        registry.register_batch("tag", |_: &[String], _: &ApplyArgs| Ok(()));

        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec![("count", FunctionKind::Batch), ("tag", FunctionKind::Batch)]);
        assert_eq!(registry.len(), 2);
    }
}
