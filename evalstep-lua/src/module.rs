use mlua::prelude::*;

/// A named binding exposed to evaluated scripts
///
/// Each module installs one global (a table, a userdata or a plain value)
/// into a fresh sandbox. Registration must not change the module itself: the
/// same module set is installed into every evaluation.
///
/// # Example
///
/// ```rust
/// use evalstep_lua::ContextModule;
/// use mlua::prelude::*;
///
/// struct Answer;
///
/// impl ContextModule for Answer {
///     fn id(&self) -> &'static str {
///         "answer"
///     }
///
///     fn register(&self, lua: &Lua) -> LuaResult<()> {
///         lua.globals().set(self.id(), 42)
///     }
///
///     fn stubs(&self) -> String {
///         "---@meta\n---@type integer\nanswer = 42\n".to_string()
///     }
/// }
/// ```
pub trait ContextModule: Send + Sync {
    /// Global name the module is reachable under
    ///
    /// Must be a valid Lua identifier and unique within a registry.
    fn id(&self) -> &'static str;

    /// Installs the module into `lua`
    fn register(&self, lua: &Lua) -> LuaResult<()>;

    /// LuaLS annotations describing the module, starting with `---@meta`
    fn stubs(&self) -> String;
}

/// Ordered set of [`ContextModule`]s forming the evaluation context
pub struct ModuleRegistry {
    modules: Vec<Box<dyn ContextModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Adds a module
    ///
    /// # Panics
    /// Panics if a module with the same ID is already registered
    pub fn register<M: ContextModule + 'static>(&mut self, module: M) {
        let id = module.id();
        if self.modules.iter().any(|m| m.id() == id) {
            panic!("Module with id '{}' is already registered", id);
        }
        self.modules.push(Box::new(module));
    }

    /// Builder form of [`ModuleRegistry::register`]
    pub fn with<M: ContextModule + 'static>(mut self, module: M) -> Self {
        self.register(module);
        self
    }

    pub fn get(&self, id: &str) -> Option<&dyn ContextModule> {
        self.modules
            .iter()
            .find(|m| m.id() == id)
            .map(|m| m.as_ref())
    }

    pub fn modules(&self) -> &[Box<dyn ContextModule>] {
        &self.modules
    }

    /// Installs every module into `lua`, stopping at the first failure
    pub fn register_all(&self, lua: &Lua) -> LuaResult<()> {
        for module in &self.modules {
            module.register(lua)?;
        }
        Ok(())
    }

    /// Concatenated stubs of all modules, suitable for a `.lua` definition file
    pub fn generate_stubs(&self) -> String {
        let mut stubs = String::new();
        for module in &self.modules {
            stubs.push_str(&module.stubs());
            stubs.push_str("\n\n");
        }
        stubs
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestModule;

    impl ContextModule for TestModule {
        fn id(&self) -> &'static str {
            "test"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", 42)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }

        fn stubs(&self) -> String {
            "---@meta\n---@class test\ntest = {}".to_string()
        }
    }

    struct Broken;

    impl ContextModule for Broken {
        fn id(&self) -> &'static str {
            "broken"
        }

        fn register(&self, _lua: &Lua) -> LuaResult<()> {
            Err(LuaError::RuntimeError("cannot register".to_string()))
        }

        fn stubs(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn test_module_registration() {
        let registry = ModuleRegistry::new().with(TestModule);

        assert!(registry.get("test").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.modules().len(), 1);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_registration() {
        let mut registry = ModuleRegistry::new();
        registry.register(TestModule);
        registry.register(TestModule);
    }

    #[test]
    fn test_register_all_installs_globals() {
        let registry = ModuleRegistry::new().with(TestModule);
        let lua = Lua::new();
        registry.register_all(&lua).unwrap();

        let value: i64 = lua.load("return test.value").eval().unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_register_all_stops_on_error() {
        let registry = ModuleRegistry::new().with(Broken).with(TestModule);
        let lua = Lua::new();

        assert!(registry.register_all(&lua).is_err());
        let installed: bool = lua.load("return test ~= nil").eval().unwrap();
        assert!(!installed);
    }

    #[test]
    fn test_stub_generation() {
        let registry = ModuleRegistry::new().with(TestModule);

        let stubs = registry.generate_stubs();
        assert!(stubs.contains("---@meta"));
        assert!(stubs.contains("test = {}"));
    }
}
