use std::collections::BTreeSet;

use tracing::{debug, instrument, warn};

use crate::ast::{
    Block, ContractDecl, ContractKind, ContractMember, EventDecl, Expression, ExpressionKind,
    FunctionDecl, FunctionKind, ModifierDecl, ParameterDecl, SourcePos, SourceUnit, Statement,
    TypeName, VariableDecl,
};
use crate::error::ExtractionError;
use crate::model::CodeLocation;

pub const UNKNOWN_TYPE: &str = "unknown";
pub const CONSTRUCTOR_NAME: &str = "constructor";
pub const FALLBACK_NAME: &str = "<fallback>";
pub const RECEIVE_NAME: &str = "<receive>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub visibility: String,
    pub modifiers: Vec<String>,
    pub parameters: Vec<Parameter>,
    pub returns: Vec<Parameter>,
    pub state_mutability: String,
    pub location: CodeLocation,
    pub has_body: bool,
    /// Event names used in `emit` statements of the body.
    pub emitted_events: Vec<String>,
    /// Parameters compared against `address(0)` somewhere in the body.
    pub zero_checked_params: Vec<String>,
}

impl FunctionInfo {
    pub fn is_externally_callable(&self) -> bool {
        matches!(self.visibility.as_str(), "public" | "external")
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.state_mutability.as_str(), "view" | "pure")
    }

    pub fn has_modifier(&self, name: &str) -> bool {
        self.modifiers.iter().any(|modifier| modifier == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub type_name: String,
    pub visibility: String,
    pub has_initializer: bool,
    pub constant: bool,
    pub location: CodeLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub location: CodeLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierInfo {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub location: CodeLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalCallKind {
    Call,
    Delegatecall,
    Send,
    Transfer,
}

impl ExternalCallKind {
    pub fn from_member(member: &str) -> Option<Self> {
        match member {
            "call" => Some(Self::Call),
            "delegatecall" => Some(Self::Delegatecall),
            "send" => Some(Self::Send),
            "transfer" => Some(Self::Transfer),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Delegatecall => "delegatecall",
            Self::Send => "send",
            Self::Transfer => "transfer",
        }
    }

    /// Kinds whose failure is reported through a return value rather than a revert.
    pub fn returns_status(self) -> bool {
        !matches!(self, Self::Transfer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCall {
    pub kind: ExternalCallKind,
    pub location: CodeLocation,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMetadata {
    pub name: String,
    pub kind: ContractKind,
    pub bases: Vec<String>,
    pub location: CodeLocation,
    pub functions: Vec<FunctionInfo>,
    pub state_variables: Vec<StateVariable>,
    pub events: Vec<EventInfo>,
    pub modifiers: Vec<ModifierInfo>,
    pub external_calls: Vec<ExternalCall>,
    /// Every identifier read or written in function, modifier and initializer expressions.
    pub referenced_identifiers: BTreeSet<String>,
    /// Names invoked as bare identifiers (`_mint(..)`), i.e. calls that stay inside the contract.
    pub internal_calls: BTreeSet<String>,
}

impl ContractMetadata {
    pub fn calls_in(&self, function: &str) -> impl Iterator<Item = &ExternalCall> + '_ {
        let function = function.to_string();
        self.external_calls
            .iter()
            .filter(move |call| call.location.function_name.as_deref() == Some(function.as_str()))
    }
}

/// Builds one [`ContractMetadata`] per contract-like declaration, in source order.
///
/// Declarations that cannot be described are skipped with a warning.
#[instrument(name = "extract_metadata", skip(unit), fields(items = unit.items.len()))]
pub fn extract(unit: &SourceUnit, file: &str) -> Vec<ContractMetadata> {
    let mut contracts = Vec::new();
    for decl in unit.contracts() {
        match extract_contract(decl, file) {
            Ok(metadata) => contracts.push(metadata),
            Err(err) => warn!(error = %err, "skipping contract declaration"),
        }
    }
    debug!(contracts = contracts.len(), "metadata extracted");
    contracts
}

fn location(file: &str, pos: SourcePos) -> CodeLocation {
    CodeLocation::new(file, pos.line, pos.column)
}

fn extract_contract(decl: &ContractDecl, file: &str) -> Result<ContractMetadata, ExtractionError> {
    let name = decl.name.clone().ok_or(ExtractionError::MissingField {
        kind: "contract",
        field: "name",
        line: decl.pos.line,
    })?;

    let mut metadata = ContractMetadata {
        name: name.clone(),
        kind: decl.kind,
        bases: decl.bases.clone(),
        location: location(file, decl.pos).in_contract(name.as_str()),
        functions: Vec::new(),
        state_variables: Vec::new(),
        events: Vec::new(),
        modifiers: Vec::new(),
        external_calls: Vec::new(),
        referenced_identifiers: BTreeSet::new(),
        internal_calls: BTreeSet::new(),
    };

    for member in &decl.members {
        let outcome = match member {
            ContractMember::Function(function) => {
                extract_function(function, &name, file).map(|(info, calls)| {
                    if let Some(body) = &function.body {
                        collect_references(body, &mut metadata);
                    }
                    metadata.functions.push(info);
                    metadata.external_calls.extend(calls);
                })
            }
            ContractMember::StateVariable(decl) => {
                for variable in &decl.variables {
                    match state_variable(variable, &name, file) {
                        Ok(var) => {
                            if let Some(init) = &variable.initializer {
                                collect_expression_references(init, &mut metadata);
                            }
                            metadata.state_variables.push(var);
                        }
                        Err(err) => warn!(contract = %name, error = %err, "skipping state variable"),
                    }
                }
                Ok(())
            }
            ContractMember::Event(event) => {
                event_info(event, &name, file).map(|info| metadata.events.push(info))
            }
            ContractMember::Modifier(modifier) => {
                modifier_info(modifier, &name, file).map(|info| {
                    if let Some(body) = &modifier.body {
                        collect_references(body, &mut metadata);
                    }
                    metadata.modifiers.push(info);
                })
            }
            ContractMember::Unsupported(_) => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(contract = %name, error = %err, "skipping declaration");
        }
    }

    Ok(metadata)
}

fn extract_function(
    function: &FunctionDecl,
    contract: &str,
    file: &str,
) -> Result<(FunctionInfo, Vec<ExternalCall>), ExtractionError> {
    let name = match function.kind {
        FunctionKind::Function => function.name.clone().ok_or(ExtractionError::MissingField {
            kind: "function",
            field: "name",
            line: function.pos.line,
        })?,
        FunctionKind::Constructor => CONSTRUCTOR_NAME.to_string(),
        FunctionKind::Fallback => FALLBACK_NAME.to_string(),
        FunctionKind::Receive => RECEIVE_NAME.to_string(),
    };

    let parameters = parameters(&function.parameters);
    let mut emitted_events = Vec::new();
    let mut zero_checked_params = Vec::new();
    let mut calls = Vec::new();

    if let Some(body) = &function.body {
        emitted_events = emitted_events_in(body);
        zero_checked_params = parameters
            .iter()
            .filter(|param| !param.name.is_empty() && is_zero_checked(body, &param.name))
            .map(|param| param.name.clone())
            .collect();

        let mut collector = CallCollector {
            file,
            contract,
            function: &name,
            calls: Vec::new(),
        };
        collector.visit_block(&body.statements);
        calls = collector.calls;
    }

    let state_mutability = match function.state_mutability.as_deref() {
        Some("constant") => "view".to_string(),
        Some(value) => value.to_string(),
        None => "nonpayable".to_string(),
    };

    let info = FunctionInfo {
        visibility: function
            .visibility
            .clone()
            .unwrap_or_else(|| "public".to_string()),
        modifiers: function.modifiers.clone(),
        parameters,
        returns: self::parameters(&function.returns),
        state_mutability,
        location: location(file, function.pos)
            .in_function(name.as_str())
            .in_contract(contract),
        has_body: function.body.is_some(),
        emitted_events,
        zero_checked_params,
        name,
    };
    Ok((info, calls))
}

fn state_variable(
    variable: &VariableDecl,
    contract: &str,
    file: &str,
) -> Result<StateVariable, ExtractionError> {
    let name = variable.name.clone().ok_or(ExtractionError::MissingField {
        kind: "state variable",
        field: "name",
        line: variable.pos.line,
    })?;
    Ok(StateVariable {
        name,
        type_name: render_type(variable.type_name.as_ref()),
        visibility: variable
            .visibility
            .clone()
            .unwrap_or_else(|| "internal".to_string()),
        has_initializer: variable.initializer.is_some(),
        constant: variable.constant,
        location: location(file, variable.pos).in_contract(contract),
    })
}

fn event_info(event: &EventDecl, contract: &str, file: &str) -> Result<EventInfo, ExtractionError> {
    let name = event.name.clone().ok_or(ExtractionError::MissingField {
        kind: "event",
        field: "name",
        line: event.pos.line,
    })?;
    Ok(EventInfo {
        name,
        parameters: parameters(&event.parameters),
        location: location(file, event.pos).in_contract(contract),
    })
}

fn modifier_info(
    modifier: &ModifierDecl,
    contract: &str,
    file: &str,
) -> Result<ModifierInfo, ExtractionError> {
    let name = modifier.name.clone().ok_or(ExtractionError::MissingField {
        kind: "modifier",
        field: "name",
        line: modifier.pos.line,
    })?;
    Ok(ModifierInfo {
        name,
        parameters: parameters(&modifier.parameters),
        location: location(file, modifier.pos).in_contract(contract),
    })
}

fn parameters(decls: &[ParameterDecl]) -> Vec<Parameter> {
    decls
        .iter()
        .map(|decl| Parameter {
            name: decl.name.clone().unwrap_or_default(),
            type_name: render_type(decl.type_name.as_ref()),
        })
        .collect()
}

/// Renders a type the way it is written in source; unknown shapes become `unknown`.
pub fn render_type(type_name: Option<&TypeName>) -> String {
    match type_name {
        Some(TypeName::Elementary(name)) if !name.is_empty() => name.clone(),
        Some(TypeName::UserDefined(path)) if !path.is_empty() => path.join("."),
        Some(TypeName::Mapping { key, value }) => format!(
            "mapping({} => {})",
            render_type(Some(key)),
            render_type(Some(value))
        ),
        Some(TypeName::Array { base }) => format!("{}[]", render_type(Some(base))),
        _ => UNKNOWN_TYPE.to_string(),
    }
}

fn for_each_statement<'a>(statements: &'a [Statement], visit: &mut dyn FnMut(&'a Statement)) {
    for statement in statements {
        visit(statement);
        for child in statement.statements() {
            for_each_statement(std::slice::from_ref(child), visit);
        }
    }
}

fn emitted_events_in(body: &Block) -> Vec<String> {
    let mut events = Vec::new();
    for_each_statement(&body.statements, &mut |statement| {
        if let Statement::Emit { event, .. } = statement {
            let name = match &event.kind {
                ExpressionKind::Identifier(name) => Some(name.clone()),
                ExpressionKind::MemberAccess { member, .. } => Some(member.clone()),
                _ => None,
            };
            if let Some(name) = name {
                if !events.contains(&name) {
                    events.push(name);
                }
            }
        }
    });
    events
}

fn is_zero_address(expr: &Expression) -> bool {
    match &expr.kind {
        ExpressionKind::Call {
            callee, arguments, ..
        } => {
            callee.identifier() == Some("address")
                && matches!(arguments.as_slice(), [arg] if matches!(&arg.kind, ExpressionKind::Literal(value) if value.trim() == "0"))
        }
        _ => false,
    }
}

fn is_zero_checked(body: &Block, name: &str) -> bool {
    let mut checked = false;
    body.walk_expressions(&mut |expr| {
        if let ExpressionKind::Binary {
            left,
            operator,
            right,
        } = &expr.kind
        {
            if matches!(operator.as_str(), "==" | "!=")
                && ((is_zero_address(right) && left.mentions(name))
                    || (is_zero_address(left) && right.mentions(name)))
            {
                checked = true;
            }
        }
    });
    checked
}

fn collect_references(body: &Block, metadata: &mut ContractMetadata) {
    body.walk_expressions(&mut |expr| record_reference(expr, metadata));
}

fn collect_expression_references(expr: &Expression, metadata: &mut ContractMetadata) {
    expr.walk(&mut |inner| record_reference(inner, metadata));
}

fn record_reference(expr: &Expression, metadata: &mut ContractMetadata) {
    if let Some(name) = expr.identifier() {
        metadata.referenced_identifiers.insert(name.to_string());
    }
    if let Some(name) = expr.called_identifier() {
        metadata.internal_calls.insert(name.to_string());
    }
}

const GUARD_FUNCTIONS: [&str; 2] = ["require", "assert"];

fn is_guard_call(expr: &Expression) -> bool {
    expr.called_identifier()
        .map(|name| GUARD_FUNCTIONS.contains(&name))
        .unwrap_or(false)
}

/// Collects low-level calls of one function body and decides whether each is checked.
///
/// A call is checked when it sits inside a `require`/`assert` argument, a
/// branch/loop condition or a `return` value, or when the status it returns is
/// bound to a variable that a later statement of the same block uses in one of
/// those positions.
struct CallCollector<'a> {
    file: &'a str,
    contract: &'a str,
    function: &'a str,
    calls: Vec<ExternalCall>,
}

impl CallCollector<'_> {
    fn visit_block(&mut self, statements: &[Statement]) {
        for (index, statement) in statements.iter().enumerate() {
            let first_new = self.calls.len();
            self.visit_statement(statement);

            let Some((flag, call_pos)) = bound_status(statement) else {
                continue;
            };
            let tested_later = statements[index + 1..]
                .iter()
                .any(|later| tests_identifier(later, &flag));
            if tested_later {
                for call in &mut self.calls[first_new..] {
                    if call.location.line == call_pos.line && call.location.column == call_pos.column {
                        call.checked = true;
                    }
                }
            }
        }
    }

    fn visit_statement(&mut self, statement: &Statement) {
        match statement {
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.visit_expression(condition, true);
                self.visit_statement(then_branch);
                if let Some(other) = else_branch {
                    self.visit_statement(other);
                }
            }
            Statement::While { condition, body } | Statement::DoWhile { body, condition } => {
                self.visit_expression(condition, true);
                self.visit_statement(body);
            }
            Statement::For {
                init,
                condition,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.visit_statement(init);
                }
                for expr in condition.iter().chain(update.iter()) {
                    self.visit_expression(expr, false);
                }
                self.visit_statement(body);
            }
            Statement::Block(block) | Statement::Unchecked(block) => {
                self.visit_block(&block.statements)
            }
            Statement::Return(Some(value)) => self.visit_expression(value, true),
            Statement::Unsupported(node) => {
                self.visit_block(&node.statements);
                for expr in &node.expressions {
                    self.visit_expression(expr, false);
                }
            }
            other => {
                for expr in other.expressions() {
                    self.visit_expression(expr, false);
                }
            }
        }
    }

    fn visit_expression(&mut self, expr: &Expression, guarded: bool) {
        match &expr.kind {
            ExpressionKind::Call {
                callee,
                options,
                arguments,
            } => {
                if let Some(kind) = expr.called_member().and_then(ExternalCallKind::from_member) {
                    self.calls.push(ExternalCall {
                        kind,
                        location: location(self.file, expr.pos)
                            .in_function(self.function)
                            .in_contract(self.contract),
                        checked: guarded,
                    });
                }
                let guards_arguments = guarded || is_guard_call(expr);
                self.visit_expression(callee, guarded);
                for option in options {
                    self.visit_expression(option, guarded);
                }
                for argument in arguments {
                    self.visit_expression(argument, guards_arguments);
                }
            }
            ExpressionKind::Unsupported(node) => {
                self.visit_block(&node.statements);
                for child in &node.expressions {
                    self.visit_expression(child, guarded);
                }
            }
            _ => {
                for child in expr.children() {
                    self.visit_expression(child, guarded);
                }
            }
        }
    }
}

/// The variable receiving a low-level call's status, plus the call's position.
fn bound_status(statement: &Statement) -> Option<(String, SourcePos)> {
    let (flag, value) = match statement {
        Statement::VariableDeclaration {
            names,
            initializer: Some(value),
            ..
        } => (names.first().cloned().flatten()?, value),
        Statement::Expression(Expression {
            kind: ExpressionKind::Assignment { left, right, .. },
            ..
        }) => {
            let target = match &left.kind {
                ExpressionKind::Tuple(elements) => elements.first()?,
                _ => left.as_ref(),
            };
            (target.identifier()?.to_string(), right.as_ref())
        }
        _ => return None,
    };
    let kind = value.called_member().and_then(ExternalCallKind::from_member)?;
    kind.returns_status().then_some((flag, value.pos))
}

fn tests_identifier(statement: &Statement, name: &str) -> bool {
    let in_condition = match statement {
        Statement::If { condition, .. }
        | Statement::While { condition, .. }
        | Statement::DoWhile { condition, .. } => condition.mentions(name),
        Statement::Return(Some(value)) => value.mentions(name),
        _ => false,
    };
    if in_condition {
        return true;
    }

    let mut in_guard = false;
    for expr in statement.expressions() {
        expr.walk(&mut |inner| {
            if let ExpressionKind::Call { arguments, .. } = &inner.kind {
                if is_guard_call(inner) && arguments.iter().any(|arg| arg.mentions(name)) {
                    in_guard = true;
                }
            }
        });
    }
    in_guard
        || statement
            .statements()
            .into_iter()
            .any(|child| tests_identifier(child, name))
}
