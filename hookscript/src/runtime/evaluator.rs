use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use super::environment::Environment;
use super::error::{RuntimeError, RuntimeResult};
use super::methods;
use super::operators;
use super::values::{
    read_lock, write_lock, BoundMethod, CallArgs, Class, Coroutine, DictKey, Function, Instance,
    Value,
};
use super::Runtime;
use crate::ast::{
    Argument, BinaryOp, ClassDef, Constant, ExceptHandler, Expr, ExprKind, FStringPart,
    FunctionDef, LogicalOp, ParameterKind, Program, Stmt, StmtKind, UnaryOp,
};

/// Bound on nested expression evaluation, counted across guest calls.
pub const MAX_EXPR_DEPTH: usize = 1000;

/// Outcome of executing a statement.
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Lexical context of the code being executed.
pub(crate) struct Scope {
    env: Arc<Environment>,
    /// Target of `global` declarations
    module: Arc<Environment>,
    globals: RefCell<HashSet<String>>,
    class_body: bool,
    /// First parameter of the running function, the receiver for `super()`
    receiver: Option<String>,
}

impl Scope {
    fn module(env: Arc<Environment>) -> Self {
        Self {
            module: env.clone(),
            env,
            globals: RefCell::new(HashSet::new()),
            class_body: false,
            receiver: None,
        }
    }

    fn function(env: Arc<Environment>, module: Arc<Environment>, receiver: Option<String>) -> Self {
        Self {
            env,
            module,
            globals: RefCell::new(HashSet::new()),
            class_body: false,
            receiver,
        }
    }

    fn class(env: Arc<Environment>, module: Arc<Environment>) -> Self {
        Self {
            env,
            module,
            globals: RefCell::new(HashSet::new()),
            class_body: true,
            receiver: None,
        }
    }

    fn is_global(&self, name: &str) -> bool {
        self.globals.borrow().contains(name)
    }

    /// Scope captured by functions defined here; class bodies are skipped.
    fn closure_env(&self) -> Arc<Environment> {
        if self.class_body {
            if let Some(parent) = self.env.parent() {
                return parent.clone();
            }
        }
        self.env.clone()
    }
}

/// Per-invocation interpreter state.
pub struct Evaluator {
    runtime: Runtime,
    depth: usize,
    /// Nested `eval_expr` frames, across calls.
    expr_depth: usize,
    /// Exceptions currently being handled, innermost last; bare `raise`
    /// re-raises the last one.
    handling: Vec<RuntimeError>,
}

impl Evaluator {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime,
            depth: 0,
            expr_depth: 0,
            handling: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub(crate) fn exec_module(
        &mut self,
        program: &Program,
        module: &Arc<Environment>,
    ) -> RuntimeResult<()> {
        let scope = Scope::module(module.clone());
        match self.exec_block(&program.body, &scope)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(RuntimeError::Generic("'return' outside function".into())),
            Flow::Break | Flow::Continue => {
                Err(RuntimeError::Generic("'break' or 'continue' outside loop".into()))
            }
        }
    }

    // ---- statements ----

    fn exec_block(&mut self, stmts: &[Stmt], scope: &Scope) -> RuntimeResult<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, scope: &Scope) -> RuntimeResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval_expr(expr, scope)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval_expr(value, scope)?;
                for target in targets {
                    self.assign(target, value.clone(), scope)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                self.exec_aug_assign(target, *op, value, scope)?;
            }
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval_expr(value, scope)?;
                    self.assign(target, value, scope)?;
                }
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def, scope)?;
                self.bind_name(&def.name, function, scope);
            }
            StmtKind::ClassDef(def) => {
                let class = self.build_class(def, scope)?;
                self.bind_name(&def.name, class, scope);
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, scope)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { test, body, orelse } => {
                let test = self.eval_expr(test, scope)?;
                return if self.is_truthy(&test)? {
                    self.exec_block(body, scope)
                } else {
                    self.exec_block(orelse, scope)
                };
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => return self.exec_for(target, iter, body, orelse, scope),
            StmtKind::While { test, body, orelse } => {
                return self.exec_while(test, body, orelse, scope)
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Import(names) => {
                for alias in names {
                    let (bound, module) = match &alias.asname {
                        Some(asname) => (asname.as_str(), self.import_module(&alias.name)?),
                        None => {
                            let top = alias.bound_name();
                            // the full path must exist even though only the top is bound
                            self.import_module(&alias.name)?;
                            (top, self.import_module(top)?)
                        }
                    };
                    self.bind_name(bound, module, scope);
                }
            }
            StmtKind::ImportFrom { module, names } => {
                self.exec_import_from(module, names, scope)?;
            }
            StmtKind::Global(names) => {
                scope.globals.borrow_mut().extend(names.iter().cloned());
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody, scope),
            StmtKind::Raise { exc, cause } => {
                return Err(self.exec_raise(exc.as_ref(), cause.as_ref(), scope)?)
            }
            StmtKind::Assert { test, msg } => {
                let test = self.eval_expr(test, scope)?;
                if !self.is_truthy(&test)? {
                    let message = match msg {
                        Some(msg) => {
                            let msg = self.eval_expr(msg, scope)?;
                            self.str_of(&msg)?
                        }
                        None => String::new(),
                    };
                    return Err(RuntimeError::AssertionError(message));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target, scope)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        target: &Expr,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        scope: &Scope,
    ) -> RuntimeResult<Flow> {
        let iterable = self.eval_expr(iter, scope)?;
        let items = self.iterate(&iterable)?;
        for item in items {
            self.assign(target, item, scope)?;
            match self.exec_block(body, scope)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break => return Ok(Flow::Normal),
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        self.exec_block(orelse, scope)
    }

    fn exec_while(
        &mut self,
        test: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        scope: &Scope,
    ) -> RuntimeResult<Flow> {
        loop {
            let condition = self.eval_expr(test, scope)?;
            if !self.is_truthy(&condition)? {
                break;
            }
            match self.exec_block(body, scope)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break => return Ok(Flow::Normal),
                flow @ Flow::Return(_) => return Ok(flow),
            }
        }
        self.exec_block(orelse, scope)
    }

    fn exec_aug_assign(
        &mut self,
        target: &Expr,
        op: BinaryOp,
        value: &Expr,
        scope: &Scope,
    ) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.lookup_name(name, scope)?;
                let rhs = self.eval_expr(value, scope)?;
                let updated = operators::inplace(op, &current, &rhs)?;
                self.bind_name(name, updated, scope);
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval_expr(object, scope)?;
                let current = self.get_attribute(&object, attr)?;
                let rhs = self.eval_expr(value, scope)?;
                let updated = operators::inplace(op, &current, &rhs)?;
                self.set_attribute(&object, attr, updated)?;
            }
            ExprKind::Subscript {
                value: object,
                index,
            } => {
                let object = self.eval_expr(object, scope)?;
                let index = self.eval_expr(index, scope)?;
                let current = self.get_item(&object, &index)?;
                let rhs = self.eval_expr(value, scope)?;
                let updated = operators::inplace(op, &current, &rhs)?;
                self.set_item(&object, &index, updated)?;
            }
            _ => {
                return Err(RuntimeError::TypeError(
                    "illegal expression for augmented assignment".into(),
                ))
            }
        }
        Ok(())
    }

    fn exec_import_from(
        &mut self,
        module_name: &str,
        names: &[crate::ast::ImportAlias],
        scope: &Scope,
    ) -> RuntimeResult<()> {
        let module = self.import_module(module_name)?;
        let Value::Module(module) = module else {
            return Err(RuntimeError::ImportError(format!(
                "'{}' is not a module",
                module_name
            )));
        };
        for alias in names {
            if alias.name == "*" {
                for (name, value) in module.attrs.iter() {
                    if !name.starts_with('_') {
                        self.bind_name(name, value.clone(), scope);
                    }
                }
                continue;
            }
            let value = module.get(&alias.name).ok_or_else(|| {
                RuntimeError::ImportError(format!(
                    "cannot import name '{}' from '{}'",
                    alias.name, module_name
                ))
            })?;
            self.bind_name(alias.bound_name(), value, scope);
        }
        Ok(())
    }

    fn import_module(&mut self, name: &str) -> RuntimeResult<Value> {
        self.runtime
            .modules()
            .get(name)
            .ok_or_else(|| RuntimeError::ImportError(format!("No module named '{}'", name)))
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
        scope: &Scope,
    ) -> RuntimeResult<Flow> {
        let outcome = match self.exec_block(body, scope) {
            Ok(Flow::Normal) => self.exec_block(orelse, scope),
            Ok(flow) => Ok(flow),
            Err(err) => self.handle_exception(err, handlers, scope),
        };
        if finalbody.is_empty() {
            return outcome;
        }
        match self.exec_block(finalbody, scope)? {
            Flow::Normal => outcome,
            // control flow leaving `finally` discards the pending outcome
            flow => Ok(flow),
        }
    }

    fn handle_exception(
        &mut self,
        err: RuntimeError,
        handlers: &[ExceptHandler],
        scope: &Scope,
    ) -> RuntimeResult<Flow> {
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    let kind = self.eval_expr(kind, scope)?;
                    self.exception_matches(&err, &kind)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                let value = self.exception_value(&err);
                self.bind_name(name, value, scope);
            }
            self.handling.push(err);
            let result = self.exec_block(&handler.body, scope);
            self.handling.pop();
            if let Some(name) = &handler.name {
                scope.env.remove(name);
            }
            return result;
        }
        Err(err)
    }

    fn exec_raise(
        &mut self,
        exc: Option<&Expr>,
        cause: Option<&Expr>,
        scope: &Scope,
    ) -> RuntimeResult<RuntimeError> {
        let Some(exc) = exc else {
            return Ok(self.handling.last().cloned().unwrap_or_else(|| {
                RuntimeError::Generic("No active exception to reraise".into())
            }));
        };
        let value = self.eval_expr(exc, scope)?;
        if let Some(cause) = cause {
            self.eval_expr(cause, scope)?;
        }
        self.make_exception(value)
    }

    /// Converts a raised value (exception class or instance) into an error.
    pub fn make_exception(&mut self, value: Value) -> RuntimeResult<RuntimeError> {
        let value = match value {
            Value::Class(class) if self.is_exception_class(&class) => {
                self.instantiate(&class, CallArgs::default())?
            }
            other => other,
        };
        match &value {
            Value::Instance(instance) if self.is_exception_class(&instance.class) => {
                Ok(RuntimeError::Raised {
                    type_name: instance.class.name.clone(),
                    message: self.exception_str(instance),
                    value: value.clone(),
                })
            }
            _ => Ok(RuntimeError::TypeError(
                "exceptions must derive from BaseException".into(),
            )),
        }
    }

    fn is_exception_class(&self, class: &Arc<Class>) -> bool {
        self.runtime
            .class("BaseException")
            .map(|base| class.is_subclass_of(&base))
            .unwrap_or(false)
    }

    /// Class of the exception carried by `err`.
    pub fn exception_class(&self, err: &RuntimeError) -> Option<Arc<Class>> {
        match err {
            RuntimeError::Raised {
                value: Value::Instance(instance),
                ..
            } => Some(instance.class.clone()),
            other => self
                .runtime
                .class(other.exception_name())
                .or_else(|| self.runtime.class("Exception")),
        }
    }

    /// Guest-visible exception object for `err`.
    pub fn exception_value(&self, err: &RuntimeError) -> Value {
        if let RuntimeError::Raised { value, .. } = err {
            return value.clone();
        }
        let Some(class) = self.exception_class(err) else {
            return Value::str(err.message());
        };
        let instance = Instance::new(class);
        let message = err.message();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::Str(message)]
        };
        instance.set_attr("args", Value::tuple(args));
        Value::Instance(Arc::new(instance))
    }

    fn exception_matches(&self, err: &RuntimeError, kind: &Value) -> RuntimeResult<bool> {
        match kind {
            Value::Class(handler) if self.is_exception_class(handler) => Ok(self
                .exception_class(err)
                .map(|class| class.is_subclass_of(handler))
                .unwrap_or(false)),
            Value::Tuple(kinds) => {
                for kind in kinds.iter() {
                    if self.exception_matches(err, kind)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(RuntimeError::TypeError(
                "catching classes that do not inherit from BaseException is not allowed".into(),
            )),
        }
    }

    fn exception_str(&self, instance: &Instance) -> String {
        match instance.get_attr("args") {
            Some(Value::Tuple(args)) => match args.len() {
                0 => String::new(),
                1 => args[0].to_display_string(),
                _ => Value::Tuple(args).repr(),
            },
            Some(other) => other.to_display_string(),
            None => String::new(),
        }
    }

    fn delete(&mut self, target: &Expr, scope: &Scope) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let env = if scope.is_global(name) {
                    &scope.module
                } else {
                    &scope.env
                };
                env.remove(name)
                    .map(|_| ())
                    .ok_or_else(|| RuntimeError::name_not_defined(name))
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval_expr(value, scope)?;
                let index = self.eval_expr(index, scope)?;
                self.del_item(&object, &index)
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval_expr(value, scope)?;
                match &object {
                    Value::Instance(instance) => instance
                        .remove_attr(attr)
                        .map(|_| ())
                        .ok_or_else(|| RuntimeError::AttributeError(attr.clone())),
                    other => Err(RuntimeError::no_attribute(&other.type_name(), attr)),
                }
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.delete(item, scope)?;
                }
                Ok(())
            }
            _ => Err(RuntimeError::TypeError("cannot delete expression".into())),
        }
    }

    // ---- bindings ----

    fn bind_name(&self, name: &str, value: Value, scope: &Scope) {
        if scope.is_global(name) {
            scope.module.assign_nearest(name, value);
        } else {
            scope.env.define(name, value);
        }
    }

    fn lookup_name(&self, name: &str, scope: &Scope) -> RuntimeResult<Value> {
        let found = if scope.is_global(name) {
            scope.module.lookup(name)
        } else {
            scope.env.lookup(name)
        };
        found.ok_or_else(|| RuntimeError::name_not_defined(name))
    }

    fn assign(&mut self, target: &Expr, value: Value, scope: &Scope) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bind_name(name, value, scope);
                Ok(())
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                let items = self.iterate(&value)?;
                if items.len() > targets.len() {
                    return Err(RuntimeError::ValueError(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    )));
                }
                if items.len() < targets.len() {
                    return Err(RuntimeError::ValueError(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item, scope)?;
                }
                Ok(())
            }
            ExprKind::Attribute { value: object, attr } => {
                let object = self.eval_expr(object, scope)?;
                self.set_attribute(&object, attr, value)
            }
            ExprKind::Subscript {
                value: object,
                index,
            } => {
                let object = self.eval_expr(object, scope)?;
                let index = self.eval_expr(index, scope)?;
                self.set_item(&object, &index, value)
            }
            _ => Err(RuntimeError::TypeError("cannot assign to expression".into())),
        }
    }

    fn make_function(&mut self, def: &Arc<FunctionDef>, scope: &Scope) -> RuntimeResult<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let default = match &param.default {
                Some(expr) => Some(self.eval_expr(expr, scope)?),
                None => None,
            };
            defaults.push(default);
        }
        Ok(Value::Function(Arc::new(Function {
            def: def.clone(),
            env: scope.closure_env(),
            module: scope.module.clone(),
            defaults,
        })))
    }

    fn build_class(&mut self, def: &ClassDef, scope: &Scope) -> RuntimeResult<Value> {
        let mut bases = Vec::with_capacity(def.bases.len());
        for base in &def.bases {
            match self.eval_expr(base, scope)? {
                Value::Class(class) => bases.push(class),
                other => {
                    return Err(RuntimeError::TypeError(format!(
                        "bases must be classes, not '{}'",
                        other.type_name()
                    )))
                }
            }
        }
        let class_env = Arc::new(Environment::with_parent(scope.env.clone()));
        let class_scope = Scope::class(class_env.clone(), scope.module.clone());
        self.exec_block(&def.body, &class_scope)?;
        let class = Arc::new(Class::scripted(def.name.clone(), bases, IndexMap::new()));
        // methods see their class as `__class__`, which zero-argument super() reads
        let cell = Arc::new(Environment::with_parent(scope.closure_env()));
        cell.define("__class__", Value::Class(class.clone()));
        for (name, value) in class_env.snapshot() {
            let value = match value {
                Value::Function(function) => Value::Function(Arc::new(Function {
                    def: function.def.clone(),
                    env: cell.clone(),
                    module: function.module.clone(),
                    defaults: function.defaults.clone(),
                })),
                other => other,
            };
            class.set_attr(name, value);
        }
        Ok(Value::Class(class))
    }

    // ---- expressions ----

    fn eval_expr(&mut self, expr: &Expr, scope: &Scope) -> RuntimeResult<Value> {
        if self.expr_depth >= MAX_EXPR_DEPTH {
            return Err(RuntimeError::RecursionError(
                "maximum expression nesting exceeded".into(),
            ));
        }
        self.expr_depth += 1;
        let result = self.eval_expr_kind(expr, scope);
        self.expr_depth -= 1;
        result
    }

    fn eval_expr_kind(&mut self, expr: &Expr, scope: &Scope) -> RuntimeResult<Value> {
        match &expr.kind {
            ExprKind::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Name(name) => self.lookup_name(name, scope),
            ExprKind::FString(parts) => self.eval_fstring(parts, scope),
            ExprKind::List(items) => Ok(Value::list(self.eval_items(items, scope)?)),
            ExprKind::Tuple(items) => Ok(Value::tuple(self.eval_items(items, scope)?)),
            ExprKind::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.eval_expr(key, scope)?;
                    let value = self.eval_expr(value, scope)?;
                    map.insert(DictKey::from_value(&key)?, value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Attribute { value, attr } => {
                let object = self.eval_expr(value, scope)?;
                self.get_attribute(&object, attr)
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval_expr(value, scope)?;
                if let ExprKind::Slice { lower, upper, step } = &index.kind {
                    let lower = self.eval_slice_bound(lower.as_deref(), scope)?;
                    let upper = self.eval_slice_bound(upper.as_deref(), scope)?;
                    let step = self.eval_slice_bound(step.as_deref(), scope)?;
                    return operators::slice(&object, lower, upper, step);
                }
                let index = self.eval_expr(index, scope)?;
                self.get_item(&object, &index)
            }
            ExprKind::Slice { .. } => Err(RuntimeError::TypeError(
                "slice is only valid inside a subscript".into(),
            )),
            ExprKind::Call { func, args } => {
                let callee = self.eval_expr(func, scope)?;
                let mut args = self.eval_arguments(args, scope)?;
                if args.is_empty() && is_super(&callee) {
                    args = self.implicit_super_args(scope)?;
                }
                self.call_value(&callee, args)
            }
            ExprKind::Binary { left, op, right } => {
                let left = self.eval_expr(left, scope)?;
                let right = self.eval_expr(right, scope)?;
                operators::binary(*op, &left, &right)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.eval_expr(operand, scope)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!self.is_truthy(&operand)?)),
                    UnaryOp::Neg => operators::negate(&operand),
                    UnaryOp::Pos => operators::positive(&operand),
                }
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval_expr(left, scope)?;
                let truthy = self.is_truthy(&left)?;
                match (op, truthy) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval_expr(right, scope),
                }
            }
            ExprKind::Compare { left, ops } => {
                let mut current = self.eval_expr(left, scope)?;
                for (op, right) in ops {
                    let right = self.eval_expr(right, scope)?;
                    if !operators::compare(*op, &current, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::IfExp { test, body, orelse } => {
                let test = self.eval_expr(test, scope)?;
                if self.is_truthy(&test)? {
                    self.eval_expr(body, scope)
                } else {
                    self.eval_expr(orelse, scope)
                }
            }
            ExprKind::Lambda(def) => self.make_function(def, scope),
            ExprKind::Await(inner) => {
                let value = self.eval_expr(inner, scope)?;
                self.await_value(value)
            }
            ExprKind::ListComp {
                element,
                target,
                iter,
                conditions,
            } => self.eval_list_comp(element, target, iter, conditions, scope),
        }
    }

    /// `super()` inside a method means `super(__class__, <first argument>)`.
    fn implicit_super_args(&self, scope: &Scope) -> RuntimeResult<CallArgs> {
        let class = scope.env.lookup("__class__");
        let receiver = scope
            .receiver
            .as_deref()
            .and_then(|name| scope.env.lookup(name));
        match (class, receiver) {
            (Some(class), Some(receiver)) => Ok(CallArgs::new(vec![class, receiver])),
            _ => Err(RuntimeError::Generic("super(): no arguments".into())),
        }
    }

    fn eval_items(&mut self, items: &[Expr], scope: &Scope) -> RuntimeResult<Vec<Value>> {
        items.iter().map(|item| self.eval_expr(item, scope)).collect()
    }

    fn eval_slice_bound(&mut self, bound: Option<&Expr>, scope: &Scope) -> RuntimeResult<Option<i64>> {
        let Some(bound) = bound else {
            return Ok(None);
        };
        match self.eval_expr(bound, scope)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                RuntimeError::TypeError(
                    "slice indices must be integers or None".into(),
                )
            }),
        }
    }

    fn eval_fstring(&mut self, parts: &[FStringPart], scope: &Scope) -> RuntimeResult<Value> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Expr {
                    expr,
                    conversion,
                    format_spec,
                } => {
                    let value = self.eval_expr(expr, scope)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::Str(self.repr_of(&value)?),
                        Some(_) => Value::Str(self.str_of(&value)?),
                        None => value,
                    };
                    match format_spec.as_deref() {
                        None | Some("") => out.push_str(&self.str_of(&value)?),
                        Some(spec) => {
                            let value = match value {
                                Value::Instance(_) => Value::Str(self.str_of(&value)?),
                                other => other,
                            };
                            out.push_str(&operators::format_with_spec(&value, spec)?)
                        }
                    }
                }
            }
        }
        Ok(Value::Str(out))
    }

    fn eval_list_comp(
        &mut self,
        element: &Expr,
        target: &Expr,
        iter: &Expr,
        conditions: &[Expr],
        scope: &Scope,
    ) -> RuntimeResult<Value> {
        let iterable = self.eval_expr(iter, scope)?;
        let items = self.iterate(&iterable)?;
        let comp_env = Arc::new(Environment::with_parent(scope.env.clone()));
        let comp_scope = Scope::function(comp_env, scope.module.clone(), scope.receiver.clone());
        let mut out = Vec::new();
        'items: for item in items {
            self.assign(target, item, &comp_scope)?;
            for condition in conditions {
                let keep = self.eval_expr(condition, &comp_scope)?;
                if !self.is_truthy(&keep)? {
                    continue 'items;
                }
            }
            out.push(self.eval_expr(element, &comp_scope)?);
        }
        Ok(Value::list(out))
    }

    fn eval_arguments(&mut self, args: &[Argument], scope: &Scope) -> RuntimeResult<CallArgs> {
        let mut call_args = CallArgs::default();
        for arg in args {
            match arg {
                Argument::Positional(expr) => {
                    let value = self.eval_expr(expr, scope)?;
                    call_args.positional.push(value);
                }
                Argument::Star(expr) => {
                    let value = self.eval_expr(expr, scope)?;
                    let items = self.iterate(&value)?;
                    call_args.positional.extend(items);
                }
                Argument::Keyword { name, value } => {
                    let value = self.eval_expr(value, scope)?;
                    insert_keyword(&mut call_args, name.clone(), value)?;
                }
                Argument::DoubleStar(expr) => match self.eval_expr(expr, scope)? {
                    Value::Dict(entries) => {
                        let entries: Vec<(DictKey, Value)> = read_lock(&entries)
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect();
                        for (key, value) in entries {
                            let DictKey::Str(name) = key else {
                                return Err(RuntimeError::TypeError(
                                    "keywords must be strings".into(),
                                ));
                            };
                            insert_keyword(&mut call_args, name, value)?;
                        }
                    }
                    other => {
                        return Err(RuntimeError::TypeError(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(call_args)
    }

    // ---- calls ----

    /// Calls any callable value.
    pub fn call_value(&mut self, callee: &Value, args: CallArgs) -> RuntimeResult<Value> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => {
                builtin.arity.check(&builtin.name, args.positional.len())?;
                (builtin.func)(self, args)
            }
            Value::BoundMethod(method) => {
                let args = args.with_receiver(method.receiver.clone());
                self.call_value(&method.method, args)
            }
            Value::Class(class) => self.instantiate(class, args),
            Value::Instance(instance) => match instance.class.lookup("__call__") {
                Some(method) => self.call_value(&method, args.with_receiver(callee.clone())),
                None => Err(RuntimeError::not_callable(&callee.type_name())),
            },
            other => Err(RuntimeError::not_callable(&other.type_name())),
        }
    }

    fn call_function(&mut self, function: &Arc<Function>, args: CallArgs) -> RuntimeResult<Value> {
        let frame = Arc::new(Environment::with_parent(function.env.clone()));
        self.bind_arguments(function, args, &frame)?;
        if function.is_async() {
            let function = function.clone();
            let name = function.name().to_string();
            return Ok(Value::Coroutine(Arc::new(Coroutine::new(
                name,
                move |evaluator| evaluator.run_body(&function, frame),
            ))));
        }
        self.run_body(function, frame)
    }

    fn run_body(&mut self, function: &Function, frame: Arc<Environment>) -> RuntimeResult<Value> {
        if self.depth >= self.runtime.max_call_depth() {
            return Err(RuntimeError::RecursionError(
                "maximum recursion depth exceeded".into(),
            ));
        }
        self.depth += 1;
        let receiver = function
            .def
            .params
            .first()
            .filter(|p| p.kind == ParameterKind::Positional)
            .map(|p| p.name.clone());
        let scope = Scope::function(frame, function.module.clone(), receiver);
        let result = self.exec_block(&function.def.body, &scope);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn bind_arguments(
        &mut self,
        function: &Function,
        args: CallArgs,
        frame: &Environment,
    ) -> RuntimeResult<()> {
        let name = function.name();
        let params = &function.def.params;
        let CallArgs {
            positional,
            keywords,
        } = args;

        let positional_count = params
            .iter()
            .filter(|p| p.kind == ParameterKind::Positional)
            .count();
        let varargs = params.iter().find(|p| p.kind == ParameterKind::VarArgs);
        let kwargs = params.iter().find(|p| p.kind == ParameterKind::KwArgs);

        let given = positional.len();
        let mut positional = positional.into_iter();
        for param in params.iter().filter(|p| p.kind == ParameterKind::Positional) {
            match positional.next() {
                Some(value) => frame.define(param.name.as_str(), value),
                None => break,
            }
        }
        let extra: Vec<Value> = positional.collect();
        match varargs {
            Some(param) => frame.define(param.name.as_str(), Value::tuple(extra)),
            None if !extra.is_empty() => {
                return Err(RuntimeError::TypeError(format!(
                    "{}() takes {} positional arguments but {} were given",
                    name, positional_count, given
                )))
            }
            None => {}
        }

        let mut extra_keywords = IndexMap::new();
        for (key, value) in keywords {
            let named = params.iter().any(|p| {
                p.name == key
                    && matches!(p.kind, ParameterKind::Positional | ParameterKind::KeywordOnly)
            });
            if named {
                if frame.contains_local(&key) {
                    return Err(RuntimeError::TypeError(format!(
                        "{}() got multiple values for argument '{}'",
                        name, key
                    )));
                }
                frame.define(key, value);
            } else if kwargs.is_some() {
                extra_keywords.insert(key, value);
            } else {
                return Err(RuntimeError::TypeError(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    name, key
                )));
            }
        }
        if let Some(param) = kwargs {
            frame.define(param.name.as_str(), Value::str_dict(extra_keywords));
        }

        let mut missing = Vec::new();
        for (param, default) in params.iter().zip(&function.defaults) {
            if !matches!(param.kind, ParameterKind::Positional | ParameterKind::KeywordOnly)
                || frame.contains_local(&param.name)
            {
                continue;
            }
            match default {
                Some(value) => frame.define(param.name.as_str(), value.clone()),
                None => missing.push(format!("'{}'", param.name)),
            }
        }
        if !missing.is_empty() {
            return Err(RuntimeError::TypeError(format!(
                "{}() missing {} required argument{}: {}",
                name,
                missing.len(),
                if missing.len() == 1 { "" } else { "s" },
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Calls a class: native constructor for builtin types, otherwise a new
    /// instance initialised through `__init__`.
    pub fn instantiate(&mut self, class: &Arc<Class>, args: CallArgs) -> RuntimeResult<Value> {
        if let Some(constructor) = class.constructor.clone() {
            return constructor(self, args);
        }
        let object = Instance::new(class.clone());
        if self.is_exception_class(class) {
            object.set_attr("args", Value::tuple(args.positional.clone()));
        }
        let instance = Value::Instance(Arc::new(object));
        match class.lookup("__init__") {
            Some(init) => {
                let result = self.call_value(&init, args.with_receiver(instance.clone()))?;
                if !result.is_none() {
                    return Err(RuntimeError::TypeError(
                        "__init__() should return None".into(),
                    ));
                }
            }
            None if !args.is_empty() => {
                return Err(RuntimeError::TypeError(format!(
                    "{}() takes no arguments",
                    class.name
                )))
            }
            None => {}
        }
        Ok(instance)
    }

    /// Runs a coroutine to completion on the current thread.
    pub fn await_value(&mut self, value: Value) -> RuntimeResult<Value> {
        match value {
            Value::Coroutine(coroutine) => match coroutine.take() {
                Some(pending) => pending(self),
                None => Err(RuntimeError::Generic(
                    "cannot reuse already awaited coroutine".into(),
                )),
            },
            other => Err(RuntimeError::TypeError(format!(
                "object {} can't be used in 'await' expression",
                other.type_name()
            ))),
        }
    }

    // ---- object protocol ----

    pub fn get_attribute(&mut self, object: &Value, name: &str) -> RuntimeResult<Value> {
        match object {
            Value::Instance(instance) => {
                if name == "__class__" {
                    return Ok(Value::Class(instance.class.clone()));
                }
                if self.is_super_proxy(instance) {
                    return self.super_attribute(instance, name);
                }
                if let Some(value) = instance.get_attr(name) {
                    return Ok(value);
                }
                if let Some(value) = instance.class.lookup(name) {
                    return Ok(bind_method(value, object));
                }
                if let Some(getattr) = instance.class.lookup("__getattr__") {
                    let args = CallArgs::new(vec![object.clone(), Value::str(name)]);
                    return self.call_value(&getattr, args);
                }
                Err(RuntimeError::no_attribute(&instance.class.name, name))
            }
            Value::Class(class) => match name {
                "__name__" => Ok(Value::str(class.name.clone())),
                "__bases__" => Ok(Value::tuple(
                    class.bases.iter().cloned().map(Value::Class).collect(),
                )),
                _ => class.lookup(name).ok_or_else(|| {
                    RuntimeError::AttributeError(format!(
                        "type object '{}' has no attribute '{}'",
                        class.name, name
                    ))
                }),
            },
            Value::Module(module) => module.get(name).ok_or_else(|| {
                RuntimeError::AttributeError(format!(
                    "module '{}' has no attribute '{}'",
                    module.name, name
                ))
            }),
            Value::Function(function) if name == "__name__" => {
                Ok(Value::str(function.name().to_string()))
            }
            Value::Builtin(builtin) if name == "__name__" => Ok(Value::str(builtin.name.clone())),
            Value::BoundMethod(method) if name == "__self__" => Ok(method.receiver.clone()),
            other => methods::builtin_method(other, name)
                .ok_or_else(|| RuntimeError::no_attribute(&other.type_name(), name)),
        }
    }

    fn is_super_proxy(&self, instance: &Instance) -> bool {
        self.runtime
            .class("super")
            .map(|proxy| Arc::ptr_eq(&instance.class, &proxy))
            .unwrap_or(false)
    }

    /// Looks `name` up in the bases of `__thisclass__` and binds the result
    /// to `__self__`.
    fn super_attribute(&mut self, proxy: &Instance, name: &str) -> RuntimeResult<Value> {
        let (Some(Value::Class(this)), Some(receiver)) =
            (proxy.get_attr("__thisclass__"), proxy.get_attr("__self__"))
        else {
            return Err(RuntimeError::no_attribute("super", name));
        };
        let start = match &receiver {
            Value::Instance(instance) => instance.class.clone(),
            Value::Class(class) => class.clone(),
            _ => this.clone(),
        };
        let found = method_resolution_order(&start)
            .into_iter()
            .skip_while(|class| !Arc::ptr_eq(class, &this))
            .skip(1)
            .find_map(|class| read_lock(&class.attrs).get(name).cloned());
        match found {
            Some(value) => Ok(bind_method(value, &receiver)),
            None => Err(RuntimeError::AttributeError(format!(
                "'super' object has no attribute '{}'",
                name
            ))),
        }
    }

    pub fn set_attribute(&mut self, object: &Value, name: &str, value: Value) -> RuntimeResult<()> {
        match object {
            Value::Instance(instance) => {
                instance.set_attr(name, value);
                Ok(())
            }
            Value::Class(class) => {
                class.set_attr(name, value);
                Ok(())
            }
            other => Err(RuntimeError::AttributeError(format!(
                "'{}' object attribute '{}' is read-only",
                other.type_name(),
                name
            ))),
        }
    }

    pub fn get_item(&mut self, object: &Value, index: &Value) -> RuntimeResult<Value> {
        match object {
            Value::List(items) => {
                let items = read_lock(items);
                let i = sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = sequence_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = sequence_index(index, chars.len(), "string")?;
                Ok(Value::Str(chars[i].to_string()))
            }
            Value::Dict(entries) => {
                let key = DictKey::from_value(index)?;
                let found = read_lock(entries).get(&key).cloned();
                found.ok_or_else(|| RuntimeError::KeyError(index.repr()))
            }
            // generic aliases such as `Dict[str, Any]` evaluate to the origin
            Value::Class(_) => Ok(object.clone()),
            Value::Instance(instance) => match instance.class.lookup("__getitem__") {
                Some(method) => {
                    let args = CallArgs::new(vec![object.clone(), index.clone()]);
                    self.call_value(&method, args)
                }
                None => Err(not_subscriptable(object)),
            },
            other => Err(not_subscriptable(other)),
        }
    }

    pub fn set_item(&mut self, object: &Value, index: &Value, value: Value) -> RuntimeResult<()> {
        match object {
            Value::List(items) => {
                let mut items = write_lock(items);
                let i = sequence_index(index, items.len(), "list assignment")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(entries) => {
                let key = DictKey::from_value(index)?;
                write_lock(entries).insert(key, value);
                Ok(())
            }
            Value::Instance(instance) => match instance.class.lookup("__setitem__") {
                Some(method) => {
                    let args = CallArgs::new(vec![object.clone(), index.clone(), value]);
                    self.call_value(&method, args).map(|_| ())
                }
                None => Err(no_item_assignment(object)),
            },
            other => Err(no_item_assignment(other)),
        }
    }

    fn del_item(&mut self, object: &Value, index: &Value) -> RuntimeResult<()> {
        match object {
            Value::List(items) => {
                let mut items = write_lock(items);
                let i = sequence_index(index, items.len(), "list assignment")?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(entries) => {
                let key = DictKey::from_value(index)?;
                write_lock(entries)
                    .shift_remove(&key)
                    .map(|_| ())
                    .ok_or_else(|| RuntimeError::KeyError(index.repr()))
            }
            other => Err(RuntimeError::TypeError(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }

    /// Materializes an iterable.
    pub fn iterate(&mut self, value: &Value) -> RuntimeResult<Vec<Value>> {
        match value {
            Value::List(items) => Ok(read_lock(items).clone()),
            Value::Tuple(items) => Ok(items.as_ref().clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(entries) => Ok(read_lock(entries).keys().map(DictKey::to_value).collect()),
            Value::Set(items) => Ok(read_lock(items).iter().map(DictKey::to_value).collect()),
            Value::Iterator(iter) => Ok(super::values::lock_mutex(iter).by_ref().collect()),
            Value::Instance(instance) => match instance.class.lookup("__iter__") {
                Some(method) => {
                    let iterator = self.call_value(&method, CallArgs::new(vec![value.clone()]))?;
                    if iterator.is_same(value) {
                        return Err(RuntimeError::TypeError(
                            "iterator protocol is not supported for instances".into(),
                        ));
                    }
                    self.iterate(&iterator)
                }
                None => Err(not_iterable(value)),
            },
            other => Err(not_iterable(other)),
        }
    }

    pub fn is_truthy(&mut self, value: &Value) -> RuntimeResult<bool> {
        if let Value::Instance(instance) = value {
            if let Some(method) = instance.class.lookup("__bool__") {
                let result = self.call_value(&method, CallArgs::new(vec![value.clone()]))?;
                return Ok(result.is_truthy());
            }
            if let Some(method) = instance.class.lookup("__len__") {
                let result = self.call_value(&method, CallArgs::new(vec![value.clone()]))?;
                return Ok(result.is_truthy());
            }
        }
        Ok(value.is_truthy())
    }

    /// `str(value)`, honouring user `__str__`/`__repr__`.
    pub fn str_of(&mut self, value: &Value) -> RuntimeResult<String> {
        match value {
            Value::Instance(instance) => {
                if let Some(method) = user_method(&instance.class, "__str__") {
                    return self.call_string_method(&method, value, "__str__");
                }
                if self.is_exception_class(&instance.class) {
                    return Ok(self.exception_str(instance));
                }
                self.repr_of(value)
            }
            other => Ok(other.to_display_string()),
        }
    }

    /// `repr(value)`, honouring user `__repr__`.
    pub fn repr_of(&mut self, value: &Value) -> RuntimeResult<String> {
        match value {
            Value::Instance(instance) => {
                if let Some(method) = user_method(&instance.class, "__repr__") {
                    return self.call_string_method(&method, value, "__repr__");
                }
                if self.is_exception_class(&instance.class) {
                    let args = match instance.get_attr("args") {
                        Some(Value::Tuple(args)) => args.iter().map(Value::repr).collect(),
                        _ => Vec::new(),
                    };
                    return Ok(format!("{}({})", instance.class.name, args.join(", ")));
                }
                Ok(value.repr())
            }
            other => Ok(other.repr()),
        }
    }

    fn call_string_method(&mut self, method: &Value, receiver: &Value, name: &str) -> RuntimeResult<String> {
        match self.call_value(method, CallArgs::new(vec![receiver.clone()]))? {
            Value::Str(s) => Ok(s),
            other => Err(RuntimeError::TypeError(format!(
                "{} returned non-string (type {})",
                name,
                other.type_name()
            ))),
        }
    }

    /// Builtin class of a value; instances report their own class.
    pub fn class_of(&self, value: &Value) -> Option<Arc<Class>> {
        match value {
            Value::Instance(instance) => Some(instance.class.clone()),
            other => self.runtime.class(&other.type_name()),
        }
    }

    pub fn is_instance(&self, value: &Value, class: &Arc<Class>) -> bool {
        if let Some(object) = self.runtime.class("object") {
            if Arc::ptr_eq(class, &object) {
                return true;
            }
        }
        self.class_of(value)
            .map(|own| own.is_subclass_of(class))
            .unwrap_or(false)
    }

    /// Sorts values, optionally by a key function.
    pub fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<&Value>,
        reverse: bool,
    ) -> RuntimeResult<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let sort_key = match key {
                Some(key) if !key.is_none() => {
                    self.call_value(key, CallArgs::new(vec![item.clone()]))?
                }
                _ => item.clone(),
            };
            keyed.push((sort_key, item));
        }
        let mut error = None;
        keyed.sort_by(|a, b| match operators::order(&a.0, &b.0) {
            Ok(ordering) => ordering,
            Err(err) => {
                error.get_or_insert(err);
                Ordering::Equal
            }
        });
        if let Some(err) = error {
            return Err(err);
        }
        let mut sorted: Vec<Value> = keyed.into_iter().map(|(_, item)| item).collect();
        if reverse {
            sorted.reverse();
        }
        Ok(sorted)
    }
}

fn is_super(callee: &Value) -> bool {
    matches!(callee, Value::Class(class) if class.name == "super" && class.constructor.is_some())
}

/// Depth-first, left-to-right linearization with duplicates dropped.
fn method_resolution_order(class: &Arc<Class>) -> Vec<Arc<Class>> {
    fn visit(class: &Arc<Class>, out: &mut Vec<Arc<Class>>) {
        if out.iter().any(|seen| Arc::ptr_eq(seen, class)) {
            return;
        }
        out.push(class.clone());
        for base in &class.bases {
            visit(base, out);
        }
    }
    let mut out = Vec::new();
    visit(class, &mut out);
    out
}

fn insert_keyword(args: &mut CallArgs, name: String, value: Value) -> RuntimeResult<()> {
    if args.keywords.contains_key(&name) {
        return Err(RuntimeError::TypeError(format!(
            "got multiple values for keyword argument '{}'",
            name
        )));
    }
    args.keywords.insert(name, value);
    Ok(())
}

/// Class attributes that are callables become bound methods when read
/// through an instance.
fn bind_method(value: Value, receiver: &Value) -> Value {
    match value {
        Value::Function(_) | Value::Builtin(_) => Value::BoundMethod(Arc::new(BoundMethod {
            receiver: receiver.clone(),
            method: value,
        })),
        other => other,
    }
}

/// A callable dunder defined on the class or a base.
fn user_method(class: &Arc<Class>, name: &str) -> Option<Value> {
    match class.lookup(name) {
        Some(value @ (Value::Function(_) | Value::Builtin(_))) => Some(value),
        _ => None,
    }
}

fn sequence_index(index: &Value, len: usize, kind: &str) -> RuntimeResult<usize> {
    let Some(i) = index.as_int() else {
        return Err(RuntimeError::TypeError(format!(
            "{} indices must be integers or slices, not {}",
            kind.split(' ').next().unwrap_or(kind),
            index.type_name()
        )));
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::IndexError(format!("{} index out of range", kind)));
    }
    Ok(resolved as usize)
}

fn not_subscriptable(value: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!(
        "'{}' object is not subscriptable",
        value.type_name()
    ))
}

fn no_item_assignment(value: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!(
        "'{}' object does not support item assignment",
        value.type_name()
    ))
}

fn not_iterable(value: &Value) -> RuntimeError {
    RuntimeError::TypeError(format!("'{}' object is not iterable", value.type_name()))
}
