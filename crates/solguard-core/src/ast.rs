//! Typed parse tree consumed by the metadata extractor.
//!
//! The tree is a closed set of node kinds. Shapes the parser adapter does not
//! model are preserved as `Unsupported` variants carrying their children, so
//! walkers can still descend into them without knowing what they are.

use std::ops::Range;

/// Start of a node. `line` is 1-based, `column` 0-based; `line == 0` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceUnit {
    pub items: Vec<SourceItem>,
}

impl SourceUnit {
    pub fn contracts(&self) -> impl Iterator<Item = &ContractDecl> {
        self.items.iter().filter_map(|item| match item {
            SourceItem::Contract(contract) => Some(contract),
            _ => None,
        })
    }

    pub fn pragmas(&self) -> impl Iterator<Item = &PragmaDirective> {
        self.items.iter().filter_map(|item| match item {
            SourceItem::Pragma(pragma) => Some(pragma),
            _ => None,
        })
    }

    /// Compiler constraint from the first `pragma solidity` directive.
    pub fn solidity_pragma(&self) -> Option<&PragmaDirective> {
        self.pragmas().find(|pragma| pragma.name == "solidity")
    }

    /// Name of the contract whose source span contains `offset`.
    pub fn contract_at(&self, offset: usize) -> Option<&str> {
        self.contracts()
            .find(|contract| contract.byte_range.contains(&offset))
            .and_then(|contract| contract.name.as_deref())
    }
}

#[derive(Debug, Clone)]
pub enum SourceItem {
    Pragma(PragmaDirective),
    Contract(ContractDecl),
    Unsupported(UnsupportedNode),
}

/// `pragma <name> <value>;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaDirective {
    pub name: String,
    pub value: String,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Contract,
    AbstractContract,
    Interface,
    Library,
}

#[derive(Debug, Clone)]
pub struct ContractDecl {
    pub kind: ContractKind,
    pub name: Option<String>,
    pub bases: Vec<String>,
    pub members: Vec<ContractMember>,
    pub pos: SourcePos,
    pub byte_range: Range<usize>,
}

#[derive(Debug, Clone)]
pub enum ContractMember {
    Function(FunctionDecl),
    StateVariable(StateVariableDecl),
    Event(EventDecl),
    Modifier(ModifierDecl),
    Unsupported(UnsupportedNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
    Receive,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub kind: FunctionKind,
    pub name: Option<String>,
    pub visibility: Option<String>,
    pub state_mutability: Option<String>,
    pub modifiers: Vec<String>,
    pub parameters: Vec<ParameterDecl>,
    pub returns: Vec<ParameterDecl>,
    pub body: Option<Block>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub struct ParameterDecl {
    pub name: Option<String>,
    pub type_name: Option<TypeName>,
    pub storage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    Elementary(String),
    /// Dotted path segments, e.g. `["IERC20"]` or `["Lib", "Item"]`.
    UserDefined(Vec<String>),
    Mapping {
        key: Box<TypeName>,
        value: Box<TypeName>,
    },
    Array {
        base: Box<TypeName>,
    },
    Unsupported(String),
}

/// One declaration node; a node may declare several variables.
#[derive(Debug, Clone)]
pub struct StateVariableDecl {
    pub variables: Vec<VariableDecl>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub name: Option<String>,
    pub type_name: Option<TypeName>,
    pub visibility: Option<String>,
    pub constant: bool,
    pub initializer: Option<Expression>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub struct EventDecl {
    pub name: Option<String>,
    pub parameters: Vec<ParameterDecl>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub struct ModifierDecl {
    pub name: Option<String>,
    pub parameters: Vec<ParameterDecl>,
    pub body: Option<Block>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Block(Block),
    Unchecked(Block),
    Expression(Expression),
    /// `T a = e;` or `(T a, , T c) = e;`. Skipped tuple slots are `None`.
    VariableDeclaration {
        names: Vec<Option<String>>,
        type_names: Vec<Option<TypeName>>,
        storage: Vec<Option<String>>,
        initializer: Option<Expression>,
        pos: SourcePos,
    },
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    For {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        update: Option<Expression>,
        body: Box<Statement>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    DoWhile {
        body: Box<Statement>,
        condition: Expression,
    },
    Return(Option<Expression>),
    Emit {
        event: Expression,
        arguments: Vec<Expression>,
        pos: SourcePos,
    },
    Revert {
        error: Option<Expression>,
        arguments: Vec<Expression>,
    },
    Unsupported(UnsupportedNode),
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub pos: SourcePos,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Identifier(String),
    Literal(String),
    MemberAccess {
        object: Box<Expression>,
        member: String,
    },
    /// `callee{options}(arguments)`; options are the `{value: v, gas: g}` values.
    Call {
        callee: Box<Expression>,
        options: Vec<Expression>,
        arguments: Vec<Expression>,
    },
    Index {
        base: Box<Expression>,
        index: Option<Box<Expression>>,
    },
    Binary {
        left: Box<Expression>,
        operator: String,
        right: Box<Expression>,
    },
    Unary {
        operator: String,
        operand: Box<Expression>,
    },
    Assignment {
        left: Box<Expression>,
        operator: String,
        right: Box<Expression>,
    },
    Conditional {
        condition: Box<Expression>,
        then_value: Box<Expression>,
        else_value: Box<Expression>,
    },
    Tuple(Vec<Expression>),
    Unsupported(UnsupportedNode),
}

/// A node kind outside the modelled set, kept with whatever children could be typed.
#[derive(Debug, Clone, Default)]
pub struct UnsupportedNode {
    pub kind: String,
    pub pos: SourcePos,
    pub statements: Vec<Statement>,
    pub expressions: Vec<Expression>,
}

impl Expression {
    pub fn new(kind: ExpressionKind, pos: SourcePos) -> Self {
        Self { kind, pos }
    }

    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    /// Member name when this is a call through a member access (`x.call(..)`).
    pub fn called_member(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Call { callee, .. } => match &callee.kind {
                ExpressionKind::MemberAccess { member, .. } => Some(member),
                _ => None,
            },
            _ => None,
        }
    }

    /// Identifier name when this is a call by bare name (`require(..)`, `_mint(..)`).
    pub fn called_identifier(&self) -> Option<&str> {
        match &self.kind {
            ExpressionKind::Call { callee, .. } => callee.identifier(),
            _ => None,
        }
    }

    /// Direct children in source order.
    pub fn children(&self) -> Vec<&Expression> {
        match &self.kind {
            ExpressionKind::Identifier(_) | ExpressionKind::Literal(_) => Vec::new(),
            ExpressionKind::MemberAccess { object, .. } => vec![object.as_ref()],
            ExpressionKind::Call {
                callee,
                options,
                arguments,
            } => std::iter::once(callee.as_ref())
                .chain(options.iter())
                .chain(arguments.iter())
                .collect(),
            ExpressionKind::Index { base, index } => {
                std::iter::once(base.as_ref()).chain(index.as_deref()).collect()
            }
            ExpressionKind::Binary { left, right, .. }
            | ExpressionKind::Assignment { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            ExpressionKind::Unary { operand, .. } => vec![operand.as_ref()],
            ExpressionKind::Conditional {
                condition,
                then_value,
                else_value,
            } => vec![condition.as_ref(), then_value.as_ref(), else_value.as_ref()],
            ExpressionKind::Tuple(elements) => elements.iter().collect(),
            // Statements nested in an unknown expression are reached by
            // `walk_expression_statements`; only expressions are listed here.
            ExpressionKind::Unsupported(node) => node.expressions.iter().collect(),
        }
    }

    /// Pre-order visit of this expression and all nested expressions.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expression)) {
        visit(self);
        if let ExpressionKind::Unsupported(node) = &self.kind {
            for statement in &node.statements {
                statement.walk_expressions(visit);
            }
        }
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// True when an identifier called `name` occurs anywhere in this expression.
    pub fn mentions(&self, name: &str) -> bool {
        let mut found = false;
        self.walk(&mut |expr| {
            if expr.identifier() == Some(name) {
                found = true;
            }
        });
        found
    }
}

impl Statement {
    /// Direct expression children in source order.
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Statement::Expression(expr) => vec![expr],
            Statement::VariableDeclaration { initializer, .. } => initializer.iter().collect(),
            Statement::If { condition, .. }
            | Statement::While { condition, .. }
            | Statement::DoWhile { condition, .. } => vec![condition],
            Statement::For {
                condition, update, ..
            } => condition.iter().chain(update.iter()).collect(),
            Statement::Return(value) => value.iter().collect(),
            Statement::Emit {
                event, arguments, ..
            } => std::iter::once(event).chain(arguments.iter()).collect(),
            Statement::Revert { error, arguments } => {
                error.iter().chain(arguments.iter()).collect()
            }
            Statement::Unsupported(node) => node.expressions.iter().collect(),
            Statement::Block(_) | Statement::Unchecked(_) => Vec::new(),
        }
    }

    /// Direct statement children in source order.
    pub fn statements(&self) -> Vec<&Statement> {
        match self {
            Statement::Block(block) | Statement::Unchecked(block) => {
                block.statements.iter().collect()
            }
            Statement::If {
                then_branch,
                else_branch,
                ..
            } => std::iter::once(then_branch.as_ref())
                .chain(else_branch.as_deref())
                .collect(),
            Statement::For { init, body, .. } => init
                .as_deref()
                .into_iter()
                .chain(std::iter::once(body.as_ref()))
                .collect(),
            Statement::While { body, .. } | Statement::DoWhile { body, .. } => vec![body],
            Statement::Unsupported(node) => node.statements.iter().collect(),
            Statement::Expression(_)
            | Statement::VariableDeclaration { .. }
            | Statement::Return(_)
            | Statement::Emit { .. }
            | Statement::Revert { .. } => Vec::new(),
        }
    }

    /// Pre-order visit of every expression reachable from this statement.
    pub fn walk_expressions<'a>(&'a self, visit: &mut dyn FnMut(&'a Expression)) {
        if let Statement::For {
            init,
            condition,
            update,
            body,
        } = self
        {
            if let Some(init) = init {
                init.walk_expressions(visit);
            }
            for expr in condition.iter().chain(update.iter()) {
                expr.walk(visit);
            }
            body.walk_expressions(visit);
            return;
        }
        for expr in self.expressions() {
            expr.walk(visit);
        }
        for statement in self.statements() {
            statement.walk_expressions(visit);
        }
    }
}

impl Block {
    pub fn walk_expressions<'a>(&'a self, visit: &mut dyn FnMut(&'a Expression)) {
        for statement in &self.statements {
            statement.walk_expressions(visit);
        }
    }
}
