//! Statement and expression evaluation.
//!
//! The evaluator walks one syntax tree against an [`EvaluationContext`],
//! reducing expressions to values and performing declarations into the
//! catalog. Class bodies, defined type instances, language functions, and
//! lambdas all evaluate through here with their own scopes and stack
//! frames; `finalize` runs the deferred-work fixed point after the
//! initial manifests.

use super::access;
use super::collector::{Collector, QueryCollector};
use super::context::{
    DeclaredDefinedType, EvaluationContext, PendingOverride, PendingRelationship,
};
use super::frame::StackFrame;
use super::functions::{self, CallContext, LambdaClosure};
use super::operators;
use super::scope::{self, DefaultOperation, Scope, ScopeRef};
use crate::ast::*;
use crate::catalog::{self, Attribute, Relationship, ResourceIndex, ResourceState};
use crate::error::EvaluationError;
use crate::registry::{self, DefinedTypeDefinition};
use crate::types::{infer, RecursionGuard, Type};
use crate::value::{Value, ValueRegex, VariableValue};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// The maximum number of finalization passes.
const MAX_FINALIZE_ITERATIONS: usize = 1000;

pub struct Evaluator<'e, 'c> {
    pub context: &'e mut EvaluationContext<'c>,
    tree: Arc<SyntaxTree>,
}

impl<'e, 'c> Evaluator<'e, 'c> {
    pub fn new(context: &'e mut EvaluationContext<'c>, tree: Arc<SyntaxTree>) -> Self {
        Self { context, tree }
    }

    pub fn tree(&self) -> Arc<SyntaxTree> {
        self.tree.clone()
    }

    /// Build an AST context for a span in the current tree.
    pub fn ast_context(&self, span: crate::foundation::Span) -> AstContext {
        AstContext::new(span, self.tree.clone())
    }

    fn raise(
        &self,
        message: impl Into<String>,
        span: crate::foundation::Span,
    ) -> EvaluationError {
        self.context.raise(message, Some(self.ast_context(span)))
    }

    /// Evaluate the whole tree.
    pub fn evaluate_tree(&mut self) -> Result<Value, EvaluationError> {
        let statements = self.tree.statements.clone();
        self.evaluate_statements(&statements)
    }

    /// Evaluate statements; the value is the last statement's.
    pub fn evaluate_statements(
        &mut self,
        statements: &[Statement],
    ) -> Result<Value, EvaluationError> {
        let mut value = Value::Undef;
        for statement in statements {
            value = self.evaluate_statement(statement)?;
        }
        Ok(value)
    }

    pub fn evaluate_statement(&mut self, statement: &Statement) -> Result<Value, EvaluationError> {
        self.context
            .set_current_context(self.ast_context(statement.span()));
        match statement {
            Statement::Expression(expression) => self.evaluate(expression),
            // Definitions were registered by the scanner; their statements
            // produce nothing at evaluation time.
            Statement::Class(_)
            | Statement::DefinedType(_)
            | Statement::Node(_)
            | Statement::Function(_)
            | Statement::TypeAlias(_) => Ok(Value::Undef),
            Statement::Resource(declaration) => self.evaluate_resource(declaration),
            Statement::ResourceOverride(override_) => self.evaluate_override(override_),
            Statement::ResourceDefaults(defaults) => self.evaluate_defaults(defaults),
        }
    }

    pub fn evaluate(&mut self, expression: &Expression) -> Result<Value, EvaluationError> {
        match expression {
            Expression::Undef(_) => Ok(Value::Undef),
            Expression::Default(_) => Ok(Value::Default),
            Expression::Boolean { value, .. } => Ok(Value::Boolean(*value)),
            Expression::Number { value, .. } => Ok(match value {
                crate::lexer::NumberValue::Integer(i) => Value::Integer(*i),
                crate::lexer::NumberValue::Float(f) => Value::Float(*f),
            }),
            Expression::String { value, .. } => Ok(Value::string(value.clone())),
            Expression::Regex { span, pattern } => ValueRegex::new(pattern.clone())
                .map(Value::Regex)
                .map_err(|e| self.raise(format!("invalid regular expression: {}.", e), *span)),
            Expression::Variable { span, name } => {
                let context = self.ast_context(*span);
                match self
                    .context
                    .lookup_variable(name, Some(&context), true)
                {
                    Some(value) => Ok(Value::Variable(VariableValue {
                        name: name.clone(),
                        value,
                    })),
                    None => Ok(Value::Undef),
                }
            }
            Expression::Name { name, .. } => Ok(Value::string(name.clone())),
            Expression::BareWord { word, .. } => Ok(Value::string(word.clone())),
            Expression::TypeName { span, name } => {
                let t = self.resolve_type(name, *span)?;
                Ok(Value::Type(Box::new(t)))
            }
            Expression::Interpolated { parts, .. } => self.evaluate_interpolation(parts),
            Expression::Array { elements, .. } => {
                let (values, _) = self.evaluate_expanded(elements)?;
                Ok(Value::Array(values))
            }
            Expression::Hash { entries, .. } => {
                let mut hash = crate::value::ValueHash::new();
                for (key, value) in entries {
                    let key = self.evaluate(key)?.dereference().clone();
                    let value = self.evaluate(value)?.dereference().clone();
                    hash.insert(key, value);
                }
                Ok(Value::Hash(hash))
            }
            Expression::Nested { expression, .. } => self.evaluate(expression),
            Expression::Unary {
                operator, operand, ..
            } => {
                let value = self.evaluate(operand)?;
                let operand_context = self.ast_context(operand.span());
                operators::unary(self.context, *operator, &value, &operand_context)
            }
            Expression::Binary {
                operator,
                operator_span,
                left,
                right,
            } => self.evaluate_binary(*operator, *operator_span, left, right),
            Expression::If(if_expression) => self.evaluate_if(if_expression),
            Expression::Unless(unless) => self.evaluate_unless(unless),
            Expression::Case(case) => self.evaluate_case(case),
            Expression::Selector(selector) => self.evaluate_selector(selector),
            Expression::Access {
                span,
                target,
                arguments,
            } => {
                let target_value = self.evaluate(target)?;
                let (values, contexts) = self.evaluate_expanded(arguments)?;
                if values.is_empty() {
                    return Err(self.raise("expected at least one access argument.", *span));
                }
                access::access(
                    self.context,
                    &target_value,
                    &self.ast_context(target.span()),
                    &values,
                    &contexts,
                )
            }
            Expression::FunctionCall(call) => self.evaluate_call(
                &call.name,
                call.name_span,
                &call.arguments,
                call.lambda.as_ref(),
                call.span,
                None,
            ),
            Expression::MethodCall(call) => {
                let target = self.evaluate(&call.target)?;
                self.evaluate_call(
                    &call.name,
                    call.name_span,
                    &call.arguments,
                    call.lambda.as_ref(),
                    call.span,
                    Some((target, self.ast_context(call.target.span()))),
                )
            }
            Expression::Collector(collector) => self.evaluate_collector(collector),
        }
    }

    // ---- strings ----

    fn evaluate_interpolation(
        &mut self,
        parts: &[InterpolationPart],
    ) -> Result<Value, EvaluationError> {
        let mut result = String::new();
        for part in parts {
            match part {
                InterpolationPart::Literal(text) => result.push_str(text),
                InterpolationPart::Interpolation(statements) => {
                    let value = self.evaluate_statements(statements)?;
                    result.push_str(&value.to_string());
                }
            }
        }
        Ok(Value::string(result))
    }

    // ---- operators ----

    fn evaluate_binary(
        &mut self,
        operator: BinaryOperator,
        _operator_span: crate::foundation::Span,
        left: &Expression,
        right: &Expression,
    ) -> Result<Value, EvaluationError> {
        match operator {
            BinaryOperator::Assign => self.evaluate_assignment(left, right),
            BinaryOperator::And => {
                let lhs = self.evaluate(left)?;
                if !lhs.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                let rhs = self.evaluate(right)?;
                Ok(Value::Boolean(rhs.is_truthy()))
            }
            BinaryOperator::Or => {
                let lhs = self.evaluate(left)?;
                if lhs.is_truthy() {
                    return Ok(lhs);
                }
                self.evaluate(right)
            }
            operator if operator.is_edge() => {
                let lhs = self.evaluate(left)?;
                let rhs = self.evaluate(right)?;
                let (relationship, reversed) = match operator {
                    BinaryOperator::InEdge => (Relationship::Before, false),
                    BinaryOperator::InEdgeSubscribe => (Relationship::Notify, false),
                    BinaryOperator::OutEdge => (Relationship::Before, true),
                    _ => (Relationship::Notify, true),
                };
                let (source, source_span, target, target_span) = if reversed {
                    (rhs.clone(), right.span(), lhs, left.span())
                } else {
                    (lhs, left.span(), rhs.clone(), right.span())
                };
                self.context.add_relationship(PendingRelationship {
                    relationship,
                    source,
                    source_context: self.ast_context(source_span),
                    target,
                    target_context: self.ast_context(target_span),
                });
                // The chain value is the right operand, so a -> b -> c
                // attaches c to b.
                Ok(rhs)
            }
            operator => {
                let lhs = self.evaluate(left)?;
                let rhs = self.evaluate(right)?;
                operators::binary(
                    self.context,
                    operator,
                    &lhs,
                    &self.ast_context(left.span()),
                    &rhs,
                    &self.ast_context(right.span()),
                )
            }
        }
    }

    fn evaluate_assignment(
        &mut self,
        left: &Expression,
        right: &Expression,
    ) -> Result<Value, EvaluationError> {
        let value = self.evaluate(right)?;
        self.assign(left, &value)?;
        Ok(value)
    }

    fn assign(&mut self, target: &Expression, value: &Value) -> Result<(), EvaluationError> {
        match target {
            Expression::Variable { span, name } => {
                let shared = Arc::new(value.dereference().clone());
                let context = self.ast_context(*span);
                let result = self
                    .context
                    .current_scope()
                    .borrow_mut()
                    .set(name.clone(), shared, Some(context));
                result.map_err(|previous| {
                    let location = previous
                        .map(|context| {
                            format!(
                                " at {}:{}",
                                context.tree.path(),
                                context.span.begin.line
                            )
                        })
                        .unwrap_or_default();
                    self.raise(
                        format!(
                            "cannot assign to ${}: the variable was previously assigned{}.",
                            name, location
                        ),
                        *span,
                    )
                })
            }
            Expression::Array { span, elements } => {
                let Some(values) = value.as_array() else {
                    return Err(self.raise(
                        format!(
                            "cannot assign {} to an array of variables.",
                            infer(value)
                        ),
                        *span,
                    ));
                };
                if values.len() != elements.len() {
                    return Err(self.raise(
                        format!(
                            "cannot assign {} values to {} variables.",
                            values.len(),
                            elements.len()
                        ),
                        *span,
                    ));
                }
                let values = values.to_vec();
                for (element, element_value) in elements.iter().zip(values) {
                    self.assign(element, &element_value)?;
                }
                Ok(())
            }
            other => Err(self.raise(
                "illegal assignment expression: assignment can only be performed on variables and arrays of variables.",
                other.span(),
            )),
        }
    }

    // ---- control flow ----

    fn evaluate_if(&mut self, if_expression: &IfExpression) -> Result<Value, EvaluationError> {
        if self.evaluate(&if_expression.condition)?.is_truthy() {
            return self.evaluate_statements(&if_expression.body);
        }
        for (condition, body) in &if_expression.elsifs {
            if self.evaluate(condition)?.is_truthy() {
                return self.evaluate_statements(body);
            }
        }
        match &if_expression.else_body {
            Some(body) => self.evaluate_statements(body),
            None => Ok(Value::Undef),
        }
    }

    fn evaluate_unless(&mut self, unless: &UnlessExpression) -> Result<Value, EvaluationError> {
        if !self.evaluate(&unless.condition)?.is_truthy() {
            return self.evaluate_statements(&unless.body);
        }
        match &unless.else_body {
            Some(body) => self.evaluate_statements(body),
            None => Ok(Value::Undef),
        }
    }

    /// Match a case/selector option against a control value: `default`
    /// always matches, regexes match strings and set captures, arrays and
    /// hashes match structurally, types test instances, anything else is
    /// structural equality.
    fn matches(&mut self, option: &Value, control: &Value) -> Result<bool, EvaluationError> {
        let option = option.dereference();
        let control = control.dereference();
        match option {
            Value::Default => Ok(true),
            Value::Regex(regex) => Ok(match control.as_string() {
                Some(subject) => operators::apply_regex(self.context, regex, subject),
                None => false,
            }),
            Value::Array(options) => match control.as_array() {
                Some(controls) if options.len() == controls.len() => {
                    for (option, control) in options.iter().zip(controls.to_vec()) {
                        if !self.matches(option, &control)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            Value::Hash(options) => match control.as_hash() {
                Some(controls) => {
                    let controls = controls.clone();
                    for (key, option) in options.iter() {
                        match controls.get(key) {
                            Some(control) => {
                                if !self.matches(option, &control.clone())? {
                                    return Ok(false);
                                }
                            }
                            None => return Ok(false),
                        }
                    }
                    Ok(true)
                }
                None => Ok(false),
            },
            Value::Type(t) => {
                let mut guard = RecursionGuard::new();
                Ok(t.is_instance(control, &mut guard))
            }
            other => Ok(other == control),
        }
    }

    fn evaluate_case(&mut self, case: &CaseExpression) -> Result<Value, EvaluationError> {
        let control = self.evaluate(&case.expression)?;
        let mut default_body: Option<&Vec<Statement>> = None;

        for proposition in &case.propositions {
            for option in &proposition.options {
                // A splatted option matches any of its elements; the
                // default arm is remembered and tried last.
                if let Expression::Default(_) = option {
                    if default_body.is_none() {
                        default_body = Some(&proposition.body);
                    }
                    continue;
                }
                if let Expression::Unary {
                    operator: UnaryOperator::Splat,
                    operand,
                    ..
                } = option
                {
                    let splatted = self.evaluate(operand)?;
                    for candidate in operators::splat(&splatted) {
                        if self.matches(&candidate, &control)? {
                            return self.evaluate_statements(&proposition.body);
                        }
                    }
                    continue;
                }
                let option_value = self.evaluate(option)?;
                if self.matches(&option_value, &control)? {
                    return self.evaluate_statements(&proposition.body);
                }
            }
        }

        match default_body {
            Some(body) => self.evaluate_statements(body),
            None => Ok(Value::Undef),
        }
    }

    fn evaluate_selector(&mut self, selector: &SelectorExpression) -> Result<Value, EvaluationError> {
        let control = self.evaluate(&selector.target)?;
        let mut default_result: Option<&Expression> = None;

        for (option, result) in &selector.cases {
            if let Expression::Default(_) = option {
                if default_result.is_none() {
                    default_result = Some(result);
                }
                continue;
            }
            let option_value = self.evaluate(option)?;
            if self.matches(&option_value, &control)? {
                return self.evaluate(result);
            }
        }
        match default_result {
            Some(result) => self.evaluate(result),
            None => Err(self.raise(
                format!(
                    "no matching entry for selector parameter with value '{}'.",
                    control
                ),
                selector.target.span(),
            )),
        }
    }

    // ---- argument lists ----

    /// Evaluate expressions with splat expansion, keeping per-value source
    /// contexts.
    fn evaluate_expanded(
        &mut self,
        expressions: &[Expression],
    ) -> Result<(Vec<Value>, Vec<AstContext>), EvaluationError> {
        let mut values = Vec::new();
        let mut contexts = Vec::new();
        for expression in expressions {
            if let Expression::Unary {
                operator: UnaryOperator::Splat,
                operand,
                ..
            } = expression
            {
                let value = self.evaluate(operand)?;
                for element in operators::splat(&value) {
                    values.push(element);
                    contexts.push(self.ast_context(operand.span()));
                }
                continue;
            }
            values.push(self.evaluate(expression)?);
            contexts.push(self.ast_context(expression.span()));
        }
        Ok((values, contexts))
    }

    // ---- types ----

    /// Resolve a type name: built-ins, then type aliases, then resource
    /// types and defined types.
    pub fn resolve_type(
        &mut self,
        name: &str,
        span: crate::foundation::Span,
    ) -> Result<Type, EvaluationError> {
        let bare = name.trim_start_matches("::");
        if let Some(builtin) = Type::find_builtin(bare) {
            return Ok(builtin);
        }
        let normalized = registry::normalize(name);

        let alias = self
            .context
            .environment
            .clone()
            .find_type_alias(&self.context.logger.clone(), &normalized)
            .map_err(|e| self.raise(e.message, span))?;
        if let Some(definition) = alias {
            return self.resolve_alias(bare, &normalized, definition, span);
        }

        let environment = self.context.environment.clone();
        let logger = self.context.logger.clone();
        if environment
            .find_resource_type(&logger, &normalized)
            .map_err(|e| self.raise(e.message, span))?
            .is_some()
            || environment
                .find_defined_type(&logger, &normalized)
                .map_err(|e| self.raise(e.message, span))?
                .is_some()
        {
            return Ok(Type::Resource {
                type_name: Some(normalized),
                title: None,
            });
        }
        Err(self.raise(format!("unknown type '{}'.", name), span))
    }

    fn resolve_alias(
        &mut self,
        display: &str,
        normalized: &str,
        definition: crate::registry::TypeAliasDefinition,
        span: crate::foundation::Span,
    ) -> Result<Type, EvaluationError> {
        let (slot, created) = self.context.alias_slot(display, normalized);
        if !created {
            return Ok(Type::Alias(slot));
        }

        let scope = self.context.current_scope();
        self.context
            .push_frame(StackFrame::new(format!("<type alias {}>", display), scope))?;
        let result = (|| {
            let mut evaluator = Evaluator::new(self.context, definition.tree.clone());
            let value = evaluator.evaluate(&definition.statement.type_expression)?;
            match value.as_type() {
                Some(resolved) => Ok(resolved.clone()),
                None => Err(self.context.raise(
                    format!("expected type alias '{}' to evaluate to a type.", display),
                    Some(AstContext::new(
                        definition.statement.type_expression.span(),
                        definition.tree.clone(),
                    )),
                )),
            }
        })();
        self.context.pop_frame();

        let resolved = result?;
        slot.resolve(resolved);

        let alias_type = Type::Alias(slot);
        let mut guard = RecursionGuard::new();
        if !alias_type.is_real(&mut guard) {
            return Err(self.raise(
                format!("{} does not resolve to a real type.", display),
                span,
            ));
        }
        Ok(alias_type)
    }

    // ---- calls ----

    #[allow(clippy::too_many_arguments)]
    fn evaluate_call(
        &mut self,
        name: &str,
        name_span: crate::foundation::Span,
        argument_expressions: &[Expression],
        lambda: Option<&Lambda>,
        call_span: crate::foundation::Span,
        receiver: Option<(Value, AstContext)>,
    ) -> Result<Value, EvaluationError> {
        let (mut arguments, mut argument_contexts) =
            self.evaluate_expanded(argument_expressions)?;
        if let Some((receiver, receiver_context)) = receiver {
            arguments.insert(0, receiver);
            argument_contexts.insert(0, receiver_context);
        }

        let closure = lambda.map(|lambda| LambdaClosure {
            lambda: lambda.clone(),
            scope: self.context.current_scope(),
            matches: self.context.snapshot_matches(),
            tree: self.tree.clone(),
        });

        functions::dispatch(
            self,
            CallContext {
                name: name.to_string(),
                name_context: self.ast_context(name_span),
                call_context: self.ast_context(call_span),
                arguments,
                argument_contexts,
                lambda: closure,
            },
        )
    }

    /// Run a lambda closure with the given arguments.
    pub fn yield_to(
        &mut self,
        closure: &LambdaClosure,
        arguments: Vec<Value>,
        call_context: &AstContext,
    ) -> Result<Value, EvaluationError> {
        let parameters = &closure.lambda.parameters;
        let captures = parameters.last().map(|p| p.captures).unwrap_or(false);
        let required = parameters
            .iter()
            .filter(|p| !p.captures && p.default.is_none())
            .count();
        let max = if captures { usize::MAX } else { parameters.len() };
        if arguments.len() < required || arguments.len() > max {
            return Err(self.context.raise(
                format!(
                    "the block expects between {} and {} arguments but was given {}.",
                    required,
                    if captures {
                        "unlimited".to_string()
                    } else {
                        parameters.len().to_string()
                    },
                    arguments.len()
                ),
                Some(call_context.clone()),
            ));
        }

        let scope = Scope::child(closure.scope.clone(), None);
        self.context.push_match_snapshot(closure.matches.clone());
        let frame = StackFrame::new("<block>", scope.clone());
        if let Err(error) = self.context.push_frame(frame) {
            self.context.pop_match_scope();
            return Err(error);
        }

        let result = (|| {
            self.bind_parameters(&scope, parameters, arguments, closure.tree.clone())?;
            let mut evaluator = Evaluator::new(self.context, closure.tree.clone());
            evaluator.evaluate_statements(&closure.lambda.body)
        })();

        self.context.pop_frame();
        self.context.pop_match_scope();
        result
    }

    /// Bind call arguments to parameters in a scope, evaluating defaults
    /// and type restrictions.
    pub fn bind_parameters(
        &mut self,
        scope: &ScopeRef,
        parameters: &[Parameter],
        arguments: Vec<Value>,
        tree: Arc<SyntaxTree>,
    ) -> Result<(), EvaluationError> {
        let mut remaining = arguments.into_iter();
        for parameter in parameters {
            let value = if parameter.captures {
                let rest: Vec<Value> = remaining.by_ref().collect();
                Value::Array(rest)
            } else {
                match remaining.next() {
                    Some(value) => value.dereference().clone(),
                    None => match &parameter.default {
                        Some(default) => {
                            let mut evaluator = Evaluator::new(self.context, tree.clone());
                            evaluator.evaluate(default)?.dereference().clone()
                        }
                        None => {
                            return Err(self.context.raise(
                                format!("expected a value for parameter ${}.", parameter.name),
                                Some(AstContext::new(parameter.span, tree.clone())),
                            ))
                        }
                    },
                }
            };

            self.check_parameter_type(parameter, &value, &tree)?;
            let _ = scope.borrow_mut().set(
                parameter.name.clone(),
                Arc::new(value),
                Some(AstContext::new(parameter.span, tree.clone())),
            );
        }
        Ok(())
    }

    fn check_parameter_type(
        &mut self,
        parameter: &Parameter,
        value: &Value,
        tree: &Arc<SyntaxTree>,
    ) -> Result<(), EvaluationError> {
        let Some(type_expression) = &parameter.type_expression else {
            return Ok(());
        };
        let mut evaluator = Evaluator::new(self.context, tree.clone());
        let type_value = evaluator.evaluate(type_expression)?;
        let Some(expected) = type_value.as_type() else {
            return Err(self.context.raise(
                format!(
                    "expected a type for the restriction of parameter ${}.",
                    parameter.name
                ),
                Some(AstContext::new(type_expression.span(), tree.clone())),
            ));
        };
        let mut guard = RecursionGuard::new();
        if !expected.is_instance(value, &mut guard) {
            return Err(self.context.raise(
                format!(
                    "parameter ${} expects {} but was given {}.",
                    parameter.name,
                    expected,
                    infer(value)
                ),
                Some(AstContext::new(parameter.span, tree.clone())),
            ));
        }
        Ok(())
    }

    /// Call a function defined in the language.
    pub fn call_language_function(
        &mut self,
        definition: &crate::registry::FunctionDefinition,
        arguments: Vec<Value>,
        call_context: &AstContext,
    ) -> Result<Value, EvaluationError> {
        let statement = definition.statement.clone();
        let required = statement
            .parameters
            .iter()
            .filter(|p| !p.captures && p.default.is_none())
            .count();
        let captures = statement
            .parameters
            .last()
            .map(|p| p.captures)
            .unwrap_or(false);
        if arguments.len() < required
            || (!captures && arguments.len() > statement.parameters.len())
        {
            return Err(self.context.raise(
                format!(
                    "function '{}' expects between {} and {} arguments but was given {}.",
                    definition.name,
                    required,
                    if captures {
                        "unlimited".to_string()
                    } else {
                        statement.parameters.len().to_string()
                    },
                    arguments.len()
                ),
                Some(call_context.clone()),
            ));
        }

        // Functions do not see the caller's scope.
        let scope = Scope::child(self.context.top_scope(), None);
        self.context.push_frame(StackFrame::new(
            format!("<function {}>", definition.name),
            scope.clone(),
        ))?;
        let result = (|| {
            self.bind_parameters(
                &scope,
                &statement.parameters,
                arguments,
                definition.tree.clone(),
            )?;
            let mut evaluator = Evaluator::new(self.context, definition.tree.clone());
            evaluator.evaluate_statements(&statement.body)
        })();
        self.context.pop_frame();
        result
    }

    // ---- catalog statements ----

    fn evaluate_resource(
        &mut self,
        declaration: &ResourceDeclaration,
    ) -> Result<Value, EvaluationError> {
        let type_name = registry::normalize(&declaration.type_name);
        let is_class = type_name == "class";

        if is_class && declaration.status != ResourceStatus::Realized {
            return Err(self.raise(
                "classes cannot be virtual or exported resources.",
                declaration.span,
            ));
        }

        // The type must be known: a class, a defined type, or a resource
        // type schema.
        let environment = self.context.environment.clone();
        let logger = self.context.logger.clone();
        let defined_type = if is_class {
            None
        } else {
            environment
                .find_defined_type(&logger, &type_name)
                .map_err(|e| self.raise(e.message, declaration.type_span))?
        };
        let resource_type = if is_class || defined_type.is_some() {
            None
        } else {
            let found = environment
                .find_resource_type(&logger, &type_name)
                .map_err(|e| self.raise(e.message, declaration.type_span))?;
            if found.is_none() {
                return Err(self.raise(
                    format!("unknown resource type '{}'.", declaration.type_name),
                    declaration.type_span,
                ));
            }
            found
        };

        let state = match declaration.status {
            ResourceStatus::Realized => ResourceState::Realized,
            ResourceStatus::Virtualized => ResourceState::Virtualized,
            ResourceStatus::Exported => ResourceState::Exported,
        };

        let mut references = Vec::new();
        for body in &declaration.bodies {
            let title_value = self.evaluate(&body.title)?;
            let operations = self.evaluate_attribute_operations(&body.operations)?;

            let mut titles = Vec::new();
            self.collect_titles(&title_value, body.title.span(), &mut titles)?;

            for title in titles {
                if is_class {
                    let class_name = registry::normalize(&title);
                    let index = self.declare_class(
                        &class_name,
                        self.ast_context(body.title.span()),
                        operations.clone(),
                    )?;
                    let _ = index;
                    references.push(Value::Type(Box::new(Type::Class {
                        name: Some(class_name),
                    })));
                    continue;
                }

                let index = self.create_resource(
                    &type_name,
                    &title,
                    state,
                    body,
                    &operations,
                    resource_type.as_ref(),
                    defined_type.is_some(),
                )?;

                if let Some(definition) = &defined_type {
                    self.context.add_defined_type(DeclaredDefinedType {
                        resource: index,
                        definition: definition.clone(),
                    });
                }

                references.push(Value::Type(Box::new(Type::Resource {
                    type_name: Some(type_name.clone()),
                    title: Some(title),
                })));
            }
        }
        Ok(Value::Array(references))
    }

    fn collect_titles(
        &mut self,
        value: &Value,
        span: crate::foundation::Span,
        titles: &mut Vec<String>,
    ) -> Result<(), EvaluationError> {
        match value.dereference() {
            Value::String(title) => {
                if title.is_empty() {
                    return Err(self.raise("resource title cannot be empty.", span));
                }
                titles.push(title.clone());
                Ok(())
            }
            Value::Array(elements) => {
                for element in elements.clone() {
                    self.collect_titles(&element, span, titles)?;
                }
                Ok(())
            }
            other => Err(self.raise(
                format!("expected String for resource title but found {}.", infer(other)),
                span,
            )),
        }
    }

    /// Evaluate a body's attribute operations, checking duplicates and
    /// expanding `* => hash` splats.
    fn evaluate_attribute_operations(
        &mut self,
        operations: &[AttributeOperation],
    ) -> Result<Vec<(AttributeOperator, Attribute)>, EvaluationError> {
        let mut result: Vec<(AttributeOperator, Attribute)> = Vec::new();
        for operation in operations {
            let value = self.evaluate(&operation.value)?.dereference().clone();
            let name_context = self.ast_context(operation.name_span);
            let value_context = self.ast_context(operation.value.span());

            if operation.name == "*" {
                let Some(hash) = value.as_hash() else {
                    return Err(self.raise(
                        format!(
                            "expected Hash for the '*' attribute but found {}.",
                            infer(&value)
                        ),
                        operation.value.span(),
                    ));
                };
                for (key, entry) in hash.iter() {
                    let Some(name) = key.as_string() else {
                        return Err(self.raise(
                            "expected String keys in the '*' attribute hash.",
                            operation.value.span(),
                        ));
                    };
                    self.push_unique_attribute(
                        &mut result,
                        operation.operator,
                        Attribute::new(
                            name,
                            Arc::new(entry.clone()),
                            Some(name_context.clone()),
                            Some(value_context.clone()),
                        ),
                        operation.name_span,
                    )?;
                }
                continue;
            }

            self.push_unique_attribute(
                &mut result,
                operation.operator,
                Attribute::new(
                    operation.name.clone(),
                    Arc::new(value),
                    Some(name_context),
                    Some(value_context),
                ),
                operation.name_span,
            )?;
        }
        Ok(result)
    }

    fn push_unique_attribute(
        &self,
        operations: &mut Vec<(AttributeOperator, Attribute)>,
        operator: AttributeOperator,
        attribute: Attribute,
        span: crate::foundation::Span,
    ) -> Result<(), EvaluationError> {
        if operations.iter().any(|(_, existing)| existing.name == attribute.name) {
            return Err(self.raise(
                format!("attribute '{}' already exists in this body.", attribute.name),
                span,
            ));
        }
        operations.push((operator, attribute));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create_resource(
        &mut self,
        type_name: &str,
        title: &str,
        state: ResourceState,
        body: &ResourceBody,
        operations: &[(AttributeOperator, Attribute)],
        schema: Option<&crate::registry::ResourceTypeDefinition>,
        is_defined_type: bool,
    ) -> Result<ResourceIndex, EvaluationError> {
        let container = scope::nearest_resource(&self.context.current_scope());
        let context = self.ast_context(body.span);
        let index = match self.context.catalog().add(
            type_name,
            title,
            container,
            state,
            Some(&context),
        ) {
            Ok(index) => index,
            Err(existing) => {
                let resource = self.context.catalog_ref().get(existing);
                let location = resource
                    .path()
                    .map(|path| format!(" at {}:{}", path, resource.line()))
                    .unwrap_or_default();
                return Err(self.raise(
                    format!(
                        "resource {} was previously declared{}.",
                        resource.reference(),
                        location
                    ),
                    body.title.span(),
                ));
            }
        };

        // Defaults from the scope chain apply first; explicit operations
        // then assign over them or append onto them.
        let defaults = scope::collect_defaults(&self.context.current_scope(), type_name);
        {
            let resource = self.context.catalog().get_mut(index);
            resource.add_tag(type_name.to_string());
            for default in defaults {
                if operations.iter().any(|(operator, attribute)| {
                    *operator == AttributeOperator::Assign
                        && attribute.name == default.attribute.name
                }) {
                    continue;
                }
                match default.operator {
                    AttributeOperator::Assign => resource.set(default.attribute),
                    AttributeOperator::Append => resource.append(default.attribute),
                }
            }
        }

        for (operator, attribute) in operations {
            self.check_attribute(schema, is_defined_type, type_name, attribute)?;
            let resource = self.context.catalog().get_mut(index);
            match operator {
                AttributeOperator::Assign => resource.set(attribute.clone()),
                AttributeOperator::Append => resource.append(attribute.clone()),
            }
        }

        self.context.evaluate_overrides(type_name, title)?;
        Ok(index)
    }

    /// Validate an attribute against a resource type schema.
    fn check_attribute(
        &self,
        schema: Option<&crate::registry::ResourceTypeDefinition>,
        is_defined_type: bool,
        type_name: &str,
        attribute: &Attribute,
    ) -> Result<(), EvaluationError> {
        if catalog::is_metaparameter(&attribute.name) || is_defined_type {
            // Defined type parameters are validated when the instance is
            // evaluated.
            return Ok(());
        }
        let Some(schema) = schema else {
            return Ok(());
        };
        let parameter = schema
            .parameters
            .iter()
            .chain(schema.properties.iter())
            .find(|parameter| parameter.name == attribute.name);
        let Some(parameter) = parameter else {
            let context = attribute.name_context.clone();
            return Err(self.context.raise(
                format!(
                    "resource type '{}' does not have a parameter named '{}'.",
                    type_name, attribute.name
                ),
                context,
            ));
        };
        // Restricted string values are validated against the schema.
        if !parameter.values.is_empty() || !parameter.regexes.is_empty() {
            if let Some(text) = attribute.value.as_string() {
                let allowed = parameter.values.iter().any(|v| v == text)
                    || parameter.regexes.iter().any(|regex| regex.is_match(text));
                if !allowed {
                    return Err(self.context.raise(
                        format!(
                            "invalid value '{}' for parameter '{}' of resource type '{}'.",
                            text, attribute.name, type_name
                        ),
                        attribute.value_context.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Declare a class: idempotent per catalog; the first declaration
    /// evaluates the class body in a new scope contained by its stage.
    pub fn declare_class(
        &mut self,
        name: &str,
        context: AstContext,
        operations: Vec<(AttributeOperator, Attribute)>,
    ) -> Result<ResourceIndex, EvaluationError> {
        let name = registry::normalize(name);
        if name.is_empty() {
            return Err(self
                .context
                .raise("cannot declare a class with an empty name.", Some(context)));
        }

        let environment = self.context.environment.clone();
        let logger = self.context.logger.clone();
        let definition = environment
            .find_class(&logger, &name)
            .map_err(|e| self.context.raise(e.message, Some(context.clone())))?
            .ok_or_else(|| {
                self.context.raise(
                    format!("cannot declare class '{}' because it has not been defined.", name),
                    Some(context.clone()),
                )
            })?;

        // Find or create the class resource.
        let index = match self.context.catalog_ref().find("class", &name) {
            Some(index) => index,
            None => self
                .context
                .catalog()
                .add("class", &name, None, ResourceState::Realized, Some(&context))
                .expect("the class resource cannot already exist"),
        };

        // Apply any attributes (class parameters from resource syntax).
        {
            let resource = self.context.catalog().get_mut(index);
            for (operator, attribute) in &operations {
                match operator {
                    AttributeOperator::Assign => resource.set(attribute.clone()),
                    AttributeOperator::Append => resource.append(attribute.clone()),
                }
            }
        }

        // Subsequent declarations return without evaluating.
        if !self.context.mark_class_declared(&name) {
            return Ok(index);
        }

        // Contain the class in its stage.
        let stage_name = match self.context.catalog_ref().get(index).get("stage") {
            Some(attribute) => match attribute.value.as_string() {
                Some(stage) => stage.to_string(),
                None => {
                    return Err(self.context.raise(
                        format!(
                            "expected String for 'stage' metaparameter but found {}.",
                            infer(&attribute.value)
                        ),
                        attribute.value_context.clone(),
                    ))
                }
            },
            None => "main".to_string(),
        };
        let Some(stage) = self.context.catalog_ref().find("stage", &stage_name) else {
            return Err(self.context.raise(
                format!("stage '{}' does not exist in the catalog.", stage_name),
                Some(context.clone()),
            ));
        };
        self.context
            .catalog()
            .relate(Relationship::Contains, stage, index);

        // Declare the parent class first; the class scope inherits it.
        let mut parent_scope = self.context.node_or_top();
        if let Some((parent, parent_span)) = &definition.statement.parent {
            let parent_name = registry::normalize(parent);
            self.declare_class(
                &parent_name,
                AstContext::new(*parent_span, definition.tree.clone()),
                Vec::new(),
            )?;
            if let Some(scope) = self.context.find_scope(&parent_name) {
                parent_scope = scope;
            }
        }

        let scope = Scope::child(parent_scope, Some(index));
        self.context.add_scope(name.clone(), scope.clone());

        self.context
            .push_frame(StackFrame::new(format!("<class {}>", name), scope.clone()))?;
        let result = (|| {
            self.bind_resource_parameters(
                &scope,
                index,
                &definition.statement.parameters,
                definition.tree.clone(),
                &name,
                "class",
            )?;
            let mut evaluator = Evaluator::new(self.context, definition.tree.clone());
            evaluator.evaluate_statements(&definition.statement.body)?;
            Ok(())
        })();
        self.context.pop_frame();
        result.map(|()| index)
    }

    /// Bind a class's or defined type instance's parameters from its
    /// resource attributes.
    fn bind_resource_parameters(
        &mut self,
        scope: &ScopeRef,
        index: ResourceIndex,
        parameters: &[Parameter],
        tree: Arc<SyntaxTree>,
        name: &str,
        kind: &str,
    ) -> Result<(), EvaluationError> {
        // Unknown attributes (not parameters or metaparameters) are
        // rejected.
        let attribute_names: Vec<String> = self
            .context
            .catalog_ref()
            .get(index)
            .attributes()
            .map(|attribute| attribute.name.clone())
            .collect();
        for attribute_name in &attribute_names {
            let known = parameters.iter().any(|p| p.name == *attribute_name)
                || catalog::is_metaparameter(attribute_name);
            if !known {
                let context = self
                    .context
                    .catalog_ref()
                    .get(index)
                    .get(attribute_name)
                    .and_then(|attribute| attribute.name_context.clone());
                return Err(self.context.raise(
                    format!(
                        "'{}' is not a valid parameter for {} '{}'.",
                        attribute_name, kind, name
                    ),
                    context,
                ));
            }
        }

        for parameter in parameters {
            let attribute = self
                .context
                .catalog_ref()
                .get(index)
                .get(&parameter.name)
                .map(|attribute| attribute.value.clone());
            let value = match attribute {
                Some(value) => value.as_ref().clone(),
                None => match &parameter.default {
                    Some(default) => {
                        // Defaults evaluate in the new scope, in parameter
                        // order, so earlier parameters are visible.
                        self.context
                            .push_frame(StackFrame::new("<parameter default>", scope.clone()))?;
                        let result = Evaluator::new(self.context, tree.clone()).evaluate(default);
                        self.context.pop_frame();
                        let value = result?.dereference().clone();
                        self.context.catalog().get_mut(index).set(Attribute::new(
                            parameter.name.clone(),
                            Arc::new(value.clone()),
                            None,
                            None,
                        ));
                        value
                    }
                    None => {
                        return Err(self.context.raise(
                            format!(
                                "expected a value for parameter ${} of {} '{}'.",
                                parameter.name, kind, name
                            ),
                            Some(AstContext::new(parameter.span, tree.clone())),
                        ))
                    }
                },
            };
            self.check_parameter_type(parameter, &value, &tree)?;
            let _ = scope.borrow_mut().set(
                parameter.name.clone(),
                Arc::new(value),
                Some(AstContext::new(parameter.span, tree.clone())),
            );
        }
        Ok(())
    }

    fn evaluate_override(&mut self, override_: &ResourceOverride) -> Result<Value, EvaluationError> {
        let reference = self.evaluate(&override_.target)?;
        let operations = self.evaluate_attribute_operations(&override_.operations)?;
        let context = self.ast_context(override_.target.span());

        let mut failure = None;
        let mut targets = Vec::new();
        reference.each_resource(
            &mut |type_name, title| targets.push((type_name, title)),
            &mut |message| {
                if failure.is_none() {
                    failure = Some(message);
                }
            },
        );
        if let Some(message) = failure {
            return Err(self.context.raise(message, Some(context)));
        }

        for (type_name, title) in targets {
            self.context.add_override(PendingOverride {
                type_name,
                title,
                context: context.clone(),
                operations: operations.clone(),
                scope: Some(self.context.current_scope()),
            })?;
        }
        Ok(reference)
    }

    fn evaluate_defaults(&mut self, defaults: &ResourceDefaults) -> Result<Value, EvaluationError> {
        let type_name = registry::normalize(&defaults.type_name);
        let operations = self.evaluate_attribute_operations(&defaults.operations)?;
        let scope = self.context.current_scope();
        let mut scope = scope.borrow_mut();
        for (operator, attribute) in operations {
            scope.add_default(
                &type_name,
                DefaultOperation {
                    operator,
                    attribute,
                },
            );
        }
        Ok(Value::Undef)
    }

    fn evaluate_collector(
        &mut self,
        collector: &CollectorExpression,
    ) -> Result<Value, EvaluationError> {
        let type_name = registry::normalize(&collector.type_name);

        // The collected type must be a real resource type or defined type.
        let environment = self.context.environment.clone();
        let logger = self.context.logger.clone();
        let known = environment
            .find_resource_type(&logger, &type_name)
            .map_err(|e| self.raise(e.message, collector.type_span))?
            .is_some()
            || environment
                .find_defined_type(&logger, &type_name)
                .map_err(|e| self.raise(e.message, collector.type_span))?
                .is_some();
        if !known {
            return Err(self.raise(
                format!("unknown resource type '{}'.", collector.type_name),
                collector.type_span,
            ));
        }

        let query_collector = QueryCollector {
            type_name,
            exported: collector.exported,
            query: collector.query.clone(),
            scope: self.context.current_scope(),
            tree: self.tree.clone(),
            context: self.ast_context(collector.span),
            attributes: Vec::new(),
            resources: Vec::new(),
        };
        self.context
            .add_collector(Rc::new(RefCell::new(Collector::Query(query_collector))));
        Ok(Value::Undef)
    }
}

/// Evaluate one expression in a given scope (collector queries).
pub fn evaluate_in_scope(
    context: &mut EvaluationContext<'_>,
    tree: Arc<SyntaxTree>,
    scope: ScopeRef,
    expression: &Expression,
) -> Result<Value, EvaluationError> {
    context.push_frame(StackFrame::new("<collector>", scope))?;
    let mut evaluator = Evaluator::new(context, tree);
    let result = evaluator.evaluate(expression);
    evaluator.context.pop_frame();
    result
}

/// Evaluate a defined type instance's body against its resource.
fn evaluate_defined_type(
    context: &mut EvaluationContext<'_>,
    declared: &DeclaredDefinedType,
) -> Result<(), EvaluationError> {
    let definition: &DefinedTypeDefinition = &declared.definition;
    let statement = definition.statement.clone();
    let index = declared.resource;
    let title = context.catalog_ref().get(index).title().to_string();

    let scope = Scope::child(context.node_or_top(), Some(index));
    {
        let mut borrowed = scope.borrow_mut();
        let _ = borrowed.set("title", Arc::new(Value::string(title.clone())), None);
        let _ = borrowed.set("name", Arc::new(Value::string(title)), None);
    }

    context.push_frame(StackFrame::new(
        format!("<defined type {}>", definition.name),
        scope.clone(),
    ))?;
    let result = (|| {
        let mut evaluator = Evaluator::new(context, definition.tree.clone());
        evaluator.bind_resource_parameters(
            &scope,
            index,
            &statement.parameters,
            definition.tree.clone(),
            &definition.name,
            "defined type",
        )?;
        evaluator.evaluate_statements(&statement.body)?;
        Ok(())
    })();
    context.pop_frame();
    result
}

/// Run the finalization fixed point: collectors realize resources, then
/// realized deferred defined types evaluate, until nothing changes; then
/// uncollected references are reported, relationships evaluate, and
/// remaining overrides apply (or drop silently when their target never
/// appeared).
pub fn finalize(context: &mut EvaluationContext<'_>) -> Result<(), EvaluationError> {
    let mut iteration = 0usize;
    let mut index = 0usize;
    let mut virtualized: Vec<usize> = Vec::new();

    loop {
        let collectors = context.collectors.clone();
        for collector in &collectors {
            collector.borrow_mut().collect(context)?;
        }

        // Done when the queue is drained and everything deferred is still
        // virtual.
        let all_still_virtual = virtualized.iter().all(|&i| {
            let resource = context.defined_types[i].resource;
            context.catalog_ref().get(resource).is_virtual()
        });
        if index >= context.defined_types.len() && all_still_virtual {
            break;
        }

        evaluate_defined_types(context, &mut index, &mut virtualized)?;

        iteration += 1;
        if iteration >= MAX_FINALIZE_ITERATIONS {
            return Err(EvaluationError::new(
                "maximum defined type evaluations exceeded: a defined type may be infinitely recursive.",
                context.backtrace(),
            ));
        }
    }

    let collectors = context.collectors.clone();
    for collector in &collectors {
        collector.borrow().detect_uncollected(context)?;
    }

    let relationships = std::mem::take(&mut context.relationships);
    for relationship in relationships {
        evaluate_relationship(context, &relationship)?;
    }

    context.finish_overrides()
}

fn evaluate_defined_types(
    context: &mut EvaluationContext<'_>,
    index: &mut usize,
    virtualized: &mut Vec<usize>,
) -> Result<(), EvaluationError> {
    // Evaluate any previously-virtual instance that a collector realized.
    let mut still_virtual = Vec::new();
    for &i in virtualized.iter() {
        let declared = context.defined_types[i].clone();
        if context.catalog_ref().get(declared.resource).is_virtual() {
            still_virtual.push(i);
        } else {
            evaluate_defined_type(context, &declared)?;
        }
    }
    *virtualized = still_virtual;

    // Evaluate queued instances up to the current end only; newly declared
    // instances run on the next pass.
    let size = context.defined_types.len();
    while *index < size {
        let declared = context.defined_types[*index].clone();
        if context.catalog_ref().get(declared.resource).is_virtual() {
            virtualized.push(*index);
            *index += 1;
            continue;
        }
        *index += 1;
        evaluate_defined_type(context, &declared)?;
    }
    Ok(())
}

fn evaluate_relationship(
    context: &mut EvaluationContext<'_>,
    relationship: &PendingRelationship,
) -> Result<(), EvaluationError> {
    let resolve = |context: &EvaluationContext<'_>,
                   value: &Value,
                   at: &AstContext|
     -> Result<Vec<ResourceIndex>, EvaluationError> {
        let mut resolved = Vec::new();
        let failure: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);
        value.each_resource(
            &mut |type_name, title| {
                match context.catalog_ref().find(&type_name, &title) {
                    Some(index) if !context.catalog_ref().get(index).is_virtual() => {
                        resolved.push(index)
                    }
                    _ => {
                        let mut failure = failure.borrow_mut();
                        if failure.is_none() {
                            *failure = Some(format!(
                                "cannot create relationship: resource {}[{}] does not exist in the catalog.",
                                crate::types::capitalize_type_name(&type_name),
                                title
                            ));
                        }
                    }
                }
            },
            &mut |message| {
                let mut failure = failure.borrow_mut();
                if failure.is_none() {
                    *failure = Some(message);
                }
            },
        );
        let failure = failure.into_inner();
        match failure {
            Some(message) => Err(context.raise(message, Some(at.clone()))),
            None => Ok(resolved),
        }
    };

    let targets = resolve(context, &relationship.target, &relationship.target_context)?;
    let sources = resolve(context, &relationship.source, &relationship.source_context)?;

    for &source in &sources {
        for &target in &targets {
            if source == target {
                let reference = context.catalog_ref().get(source).reference();
                return Err(context.raise(
                    format!("resource {} cannot form a relationship with itself.", reference),
                    Some(relationship.source_context.clone()),
                ));
            }
            context
                .catalog()
                .relate(relationship.relationship, source, target);
        }
    }
    Ok(())
}
