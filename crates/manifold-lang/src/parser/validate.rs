//! Post-parse syntax-tree validation.
//!
//! Structural invariants that are easier to check on the finished tree
//! than during parsing: definition placement, parameter list rules,
//! assignment targets, and hostname syntax. Any failure is a
//! [`ParseError`] at the offending range.

use crate::ast::*;
use crate::error::ParseError;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Top,
    Class,
    DefinedType,
    Node,
    Function,
}

pub struct Validator {
    locations: Vec<Location>,
}

/// Validate a parsed tree.
pub fn validate(statements: &[Statement]) -> Result<(), ParseError> {
    let mut validator = Validator {
        locations: Vec::new(),
    };
    validator.statements(statements)
}

impl Validator {
    fn current(&self) -> Location {
        self.locations.last().copied().unwrap_or(Location::Top)
    }

    fn statements(&mut self, statements: &[Statement]) -> Result<(), ParseError> {
        for statement in statements {
            self.statement(statement)?;
        }
        Ok(())
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), ParseError> {
        match statement {
            Statement::Expression(expression) => self.expression(expression),
            Statement::Class(class) => self.class(class),
            Statement::DefinedType(defined) => self.defined_type(defined),
            Statement::Node(node) => self.node(node),
            Statement::Function(function) => self.function(function),
            Statement::TypeAlias(alias) => self.type_alias(alias),
            Statement::Resource(resource) => {
                for body in &resource.bodies {
                    self.expression(&body.title)?;
                    for operation in &body.operations {
                        self.expression(&operation.value)?;
                    }
                }
                Ok(())
            }
            Statement::ResourceOverride(override_) => {
                self.expression(&override_.target)?;
                for operation in &override_.operations {
                    self.expression(&operation.value)?;
                }
                Ok(())
            }
            Statement::ResourceDefaults(defaults) => {
                for operation in &defaults.operations {
                    self.expression(&operation.value)?;
                }
                Ok(())
            }
        }
    }

    fn class(&mut self, class: &ClassStatement) -> Result<(), ParseError> {
        if !matches!(self.current(), Location::Top | Location::Class) {
            return Err(ParseError::new(
                "classes can only be defined at top-level or inside another class.",
                class.span,
            ));
        }
        if !valid_definition_name(&class.name) {
            return Err(ParseError::new(
                format!("'{}' is not a valid name for a class.", class.name),
                class.name_span,
            ));
        }
        self.parameters(&class.parameters, true, true)?;
        self.locations.push(Location::Class);
        let result = self.statements(&class.body);
        self.locations.pop();
        result
    }

    fn defined_type(&mut self, defined: &DefinedTypeStatement) -> Result<(), ParseError> {
        if !matches!(self.current(), Location::Top | Location::Class) {
            return Err(ParseError::new(
                "defined types can only be defined at top-level or inside a class.",
                defined.span,
            ));
        }
        if !valid_definition_name(&defined.name) {
            return Err(ParseError::new(
                format!("'{}' is not a valid name for a defined type.", defined.name),
                defined.name_span,
            ));
        }
        self.parameters(&defined.parameters, true, true)?;
        self.locations.push(Location::DefinedType);
        let result = self.statements(&defined.body);
        self.locations.pop();
        result
    }

    fn node(&mut self, node: &NodeStatement) -> Result<(), ParseError> {
        if !matches!(self.current(), Location::Top | Location::Class) {
            return Err(ParseError::new(
                "node definitions can only be defined at top-level or inside a class.",
                node.span,
            ));
        }
        for hostname in &node.hostnames {
            if let Hostname::Literal { span, name } = hostname {
                let valid = !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
                if !valid {
                    return Err(ParseError::new(
                        format!(
                            "hostname '{}' is not valid: only letters, digits, '_', '-', and '.' are allowed.",
                            name
                        ),
                        *span,
                    ));
                }
            }
        }
        self.locations.push(Location::Node);
        let result = self.statements(&node.body);
        self.locations.pop();
        result
    }

    fn function(&mut self, function: &FunctionStatement) -> Result<(), ParseError> {
        if self.current() != Location::Top {
            return Err(ParseError::new(
                "functions can only be defined at top-level.",
                function.span,
            ));
        }
        if !valid_definition_name(&function.name) {
            return Err(ParseError::new(
                format!("'{}' is not a valid name for a function.", function.name),
                function.name_span,
            ));
        }
        self.parameters(&function.parameters, false, false)?;
        self.locations.push(Location::Function);
        let result = self.statements(&function.body);
        self.locations.pop();
        result
    }

    fn type_alias(&mut self, alias: &TypeAliasStatement) -> Result<(), ParseError> {
        if self.current() != Location::Top {
            return Err(ParseError::new(
                "type aliases can only be defined at top-level.",
                alias.span,
            ));
        }
        if alias.alias.is_empty() || alias.alias.starts_with("::") {
            return Err(ParseError::new(
                format!("'{}' is not a valid name for a type alias.", alias.alias),
                alias.alias_span,
            ));
        }
        if crate::types::is_builtin_name(&alias.alias) {
            return Err(ParseError::new(
                format!(
                    "type alias '{}' conflicts with a built-in type of the same name.",
                    alias.alias
                ),
                alias.alias_span,
            ));
        }
        self.expression(&alias.type_expression)
    }

    fn parameters(
        &mut self,
        parameters: &[Parameter],
        is_resource: bool,
        pass_by_hash: bool,
    ) -> Result<(), ParseError> {
        let mut names = HashSet::new();
        let mut has_optional = false;

        for (i, parameter) in parameters.iter().enumerate() {
            let name = parameter.name.as_str();
            let valid = name
                .chars()
                .next()
                .map(|c| c.is_ascii_lowercase() || c == '_')
                .unwrap_or(false)
                && name.chars().all(|c| c.is_alphanumeric() || c == '_');
            if !valid {
                return Err(ParseError::new(
                    format!(
                        "parameter ${} has an unacceptable name: the name must conform to /[a-z_]\\w*/.",
                        name
                    ),
                    parameter.span,
                ));
            }

            if !names.insert(name.to_string()) {
                return Err(ParseError::new(
                    format!("parameter ${} already exists in the parameter list.", name),
                    parameter.span,
                ));
            }

            if is_resource {
                if name == "title" || name == "name" {
                    return Err(ParseError::new(
                        format!("parameter ${} is reserved and cannot be used.", name),
                        parameter.span,
                    ));
                }
                if crate::catalog::is_metaparameter(name) {
                    return Err(ParseError::new(
                        format!(
                            "parameter ${} is reserved for resource metaparameter '{}'.",
                            name, name
                        ),
                        parameter.span,
                    ));
                }
            }

            if parameter.captures {
                if pass_by_hash {
                    return Err(ParseError::new(
                        format!("parameter ${} cannot be a capture parameter.", name),
                        parameter.span,
                    ));
                }
                if i != parameters.len() - 1 {
                    return Err(ParseError::new(
                        format!(
                            "parameter ${} is a capture parameter but is not the last parameter.",
                            name
                        ),
                        parameter.span,
                    ));
                }
            } else if !pass_by_hash && has_optional && parameter.default.is_none() {
                return Err(ParseError::new(
                    format!(
                        "parameter ${} is required but appears after optional parameters.",
                        name
                    ),
                    parameter.span,
                ));
            }
            if !parameter.captures {
                has_optional = parameter.default.is_some();
            }

            if let Some(default) = &parameter.default {
                if contains_assignment(default) {
                    return Err(ParseError::new(
                        "assignment expressions are not allowed in parameter default values.",
                        default.span(),
                    ));
                }
                self.expression(default)?;
            }
            if let Some(type_expression) = &parameter.type_expression {
                self.expression(type_expression)?;
            }
        }
        Ok(())
    }

    fn expression(&mut self, expression: &Expression) -> Result<(), ParseError> {
        match expression {
            Expression::Binary {
                operator: BinaryOperator::Assign,
                left,
                right,
                ..
            } => {
                self.assignment_target(left)?;
                self.expression(right)
            }
            Expression::Binary { left, right, .. } => {
                self.expression(left)?;
                self.expression(right)
            }
            Expression::Unary { operand, .. } => self.expression(operand),
            Expression::Nested { expression, .. } => self.expression(expression),
            Expression::Array { elements, .. } => {
                for element in elements {
                    self.expression(element)?;
                }
                Ok(())
            }
            Expression::Hash { entries, .. } => {
                for (key, value) in entries {
                    self.expression(key)?;
                    self.expression(value)?;
                }
                Ok(())
            }
            Expression::Interpolated { parts, .. } => {
                for part in parts {
                    if let InterpolationPart::Interpolation(statements) = part {
                        self.statements(statements)?;
                    }
                }
                Ok(())
            }
            Expression::Access {
                target, arguments, ..
            } => {
                self.expression(target)?;
                for argument in arguments {
                    self.expression(argument)?;
                }
                Ok(())
            }
            Expression::If(e) => {
                self.expression(&e.condition)?;
                self.statements(&e.body)?;
                for (condition, body) in &e.elsifs {
                    self.expression(condition)?;
                    self.statements(body)?;
                }
                if let Some(body) = &e.else_body {
                    self.statements(body)?;
                }
                Ok(())
            }
            Expression::Unless(e) => {
                self.expression(&e.condition)?;
                self.statements(&e.body)?;
                if let Some(body) = &e.else_body {
                    self.statements(body)?;
                }
                Ok(())
            }
            Expression::Case(e) => {
                self.expression(&e.expression)?;
                for proposition in &e.propositions {
                    for option in &proposition.options {
                        self.expression(option)?;
                    }
                    self.statements(&proposition.body)?;
                }
                Ok(())
            }
            Expression::Selector(e) => {
                self.expression(&e.target)?;
                for (option, result) in &e.cases {
                    self.expression(option)?;
                    self.expression(result)?;
                }
                Ok(())
            }
            Expression::FunctionCall(e) => {
                for argument in &e.arguments {
                    self.expression(argument)?;
                }
                if let Some(lambda) = &e.lambda {
                    self.lambda(lambda)?;
                }
                Ok(())
            }
            Expression::MethodCall(e) => {
                self.expression(&e.target)?;
                for argument in &e.arguments {
                    self.expression(argument)?;
                }
                if let Some(lambda) = &e.lambda {
                    self.lambda(lambda)?;
                }
                Ok(())
            }
            Expression::Collector(e) => {
                if let Some(query) = &e.query {
                    self.collector_query(query)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn collector_query(&mut self, query: &CollectorQuery) -> Result<(), ParseError> {
        match query {
            CollectorQuery::Attribute { value, .. } => self.expression(value),
            CollectorQuery::And(left, right) | CollectorQuery::Or(left, right) => {
                self.collector_query(left)?;
                self.collector_query(right)
            }
        }
    }

    fn lambda(&mut self, lambda: &Lambda) -> Result<(), ParseError> {
        self.parameters(&lambda.parameters, false, false)?;
        self.statements(&lambda.body)
    }

    fn assignment_target(&mut self, target: &Expression) -> Result<(), ParseError> {
        match target {
            Expression::Variable { span, name } => {
                if name.is_empty() {
                    return Err(ParseError::new(
                        "cannot assign to a variable with an empty name.",
                        *span,
                    ));
                }
                if name.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    return Err(ParseError::new(
                        format!(
                            "cannot assign to ${}: the name is reserved as a match variable.",
                            name
                        ),
                        *span,
                    ));
                }
                if name.contains(':') {
                    return Err(ParseError::new(
                        format!(
                            "cannot assign to ${}: assignment can only be performed on variables local to the current scope.",
                            name
                        ),
                        *span,
                    ));
                }
                Ok(())
            }
            Expression::Array { elements, .. } => {
                for element in elements {
                    self.assignment_target(element)?;
                }
                Ok(())
            }
            other => Err(ParseError::new(
                "illegal assignment expression: assignment can only be performed on variables and arrays of variables.",
                other.span(),
            )),
        }
    }
}

fn valid_definition_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with("::")
}

fn contains_assignment(expression: &Expression) -> bool {
    match expression {
        Expression::Binary {
            operator: BinaryOperator::Assign,
            ..
        } => true,
        Expression::Binary { left, right, .. } => {
            contains_assignment(left) || contains_assignment(right)
        }
        Expression::Unary { operand, .. } => contains_assignment(operand),
        Expression::Nested { expression, .. } => contains_assignment(expression),
        _ => false,
    }
}
