use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::args::Args;
use crate::handle::{BridgeHandle, Generation};
use crate::module::{MethodKind, NativeModule};

/// Invocation thunk bound to the owning module instance.
pub type MethodThunk = Box<dyn Fn(&BridgeHandle, Args) -> Result<()>>;

/// One exported method of a registered module.
pub struct MethodDescriptor {
    id: usize,
    name: String,
    arity: usize,
    kind: MethodKind,
    thunk: MethodThunk,
}

impl MethodDescriptor {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Check the argument count, then run the thunk.
    pub fn invoke(&self, bridge: &BridgeHandle, params: Vec<Value>) -> Result<()> {
        if params.len() != self.arity {
            bail!(
                "{} expects {} argument(s), got {}",
                self.name,
                self.arity,
                params.len()
            );
        }
        (self.thunk)(bridge, Args::new(params))
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A module as held by the registry: its assigned ID, exported constants and
/// method table.
pub struct RegisteredModule {
    id: usize,
    name: String,
    constants: Map<String, Value>,
    methods: Vec<MethodDescriptor>,
    _instance: Rc<RefCell<Box<dyn NativeModule>>>,
}

impl RegisteredModule {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constants(&self) -> &Map<String, Value> {
        &self.constants
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn lookup_method(&self, method_id: usize) -> Option<&MethodDescriptor> {
        self.methods.get(method_id)
    }

    fn config(&self) -> ModuleConfig {
        ModuleConfig {
            module_id: self.id,
            methods: self
                .methods
                .iter()
                .map(|m| {
                    (
                        m.name.clone(),
                        MethodConfig {
                            method_id: m.id,
                            kind: m.kind.descriptor_type(),
                        },
                    )
                })
                .collect(),
            constants: self.constants.clone(),
        }
    }
}

impl fmt::Debug for RegisteredModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredModule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish_non_exhaustive()
    }
}

/// Module configuration descriptor injected into the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDescriptor {
    #[serde(rename = "remoteModuleConfig")]
    pub remote_module_config: BTreeMap<String, ModuleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleConfig {
    #[serde(rename = "moduleID")]
    pub module_id: usize,
    pub methods: BTreeMap<String, MethodConfig>,
    pub constants: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodConfig {
    #[serde(rename = "methodID")]
    pub method_id: usize,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ConfigDescriptor {
    pub fn to_value(&self) -> Value {
        // Only maps of strings and integers; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Why a module instance was refused at registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    EmptyName,
    DuplicateModule(String),
    EmptyMethodName { module: String },
    DuplicateMethod { module: String, method: String },
    InvalidConstants { module: String },
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "module name must not be empty"),
            Self::DuplicateModule(name) => write!(f, "duplicate module name: {name}"),
            Self::EmptyMethodName { module } => {
                write!(f, "module {module} exports a method with an empty name")
            }
            Self::DuplicateMethod { module, method } => {
                write!(f, "module {module} exports method {method} twice")
            }
            Self::InvalidConstants { module } => {
                write!(f, "module {module} constants must be a JSON object")
            }
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Registered native modules of one generation.
///
/// Module IDs are the registration index; method IDs are the index within the
/// module's method table. Both are dense and only valid for
/// [`generation`](ModuleRegistry::generation).
pub struct ModuleRegistry {
    generation: Generation,
    modules: Vec<RegisteredModule>,
    index: HashMap<String, usize>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ModuleRegistry {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            modules: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Register a batch of modules. Instances that break the module contract
    /// are skipped with a warning. Returns how many were registered.
    pub fn register(&mut self, modules: Vec<Box<dyn NativeModule>>) -> usize {
        let mut registered = 0;
        for module in modules {
            match self.register_one(module) {
                Ok(id) => {
                    registered += 1;
                    tracing::debug!(
                        module_id = id,
                        module = %self.modules[id].name,
                        generation = self.generation,
                        "registered module"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        generation = self.generation,
                        "skipping module that failed registration"
                    );
                }
            }
        }
        registered
    }

    /// Register one module and return its assigned ID.
    pub fn register_one(
        &mut self,
        module: Box<dyn NativeModule>,
    ) -> std::result::Result<usize, RegistrationError> {
        let name = module.name().to_string();
        if name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if self.index.contains_key(&name) {
            return Err(RegistrationError::DuplicateModule(name));
        }

        let specs = module.methods();
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name.trim().is_empty() {
                return Err(RegistrationError::EmptyMethodName { module: name });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(RegistrationError::DuplicateMethod {
                    module: name,
                    method: spec.name.clone(),
                });
            }
        }

        let constants = match module.constants() {
            Value::Object(map) => map,
            _ => return Err(RegistrationError::InvalidConstants { module: name }),
        };

        let instance = Rc::new(RefCell::new(module));
        let methods = specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| {
                let bound = Rc::clone(&instance);
                let method_name = spec.name.clone();
                let thunk: MethodThunk = Box::new(move |bridge, args| {
                    bound.borrow_mut().invoke(&method_name, bridge, args)
                });
                MethodDescriptor {
                    id,
                    name: spec.name,
                    arity: spec.arity,
                    kind: spec.kind,
                    thunk,
                }
            })
            .collect();

        let id = self.modules.len();
        self.index.insert(name.clone(), id);
        self.modules.push(RegisteredModule {
            id,
            name,
            constants,
            methods,
            _instance: instance,
        });
        Ok(id)
    }

    pub fn lookup(&self, module_id: usize) -> Option<&RegisteredModule> {
        self.modules.get(module_id)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModule> {
        self.index.get(name).map(|&i| &self.modules[i])
    }

    pub fn modules(&self) -> &[RegisteredModule] {
        &self.modules
    }

    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Build the configuration descriptor for every registered module.
    pub fn serialize_config(&self) -> ConfigDescriptor {
        ConfigDescriptor {
            remote_module_config: self
                .modules
                .iter()
                .map(|m| (m.name.clone(), m.config()))
                .collect(),
        }
    }

    /// Release every module.
    pub fn clear(&mut self) {
        self.index.clear();
        self.modules.clear();
    }

    /// Release every module and start a new generation.
    pub fn reset(&mut self, generation: Generation) {
        self.clear();
        self.generation = generation;
    }
}
