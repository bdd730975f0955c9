//! Adapter from the tree-sitter-solidity concrete syntax tree into [`crate::ast`].

use tracing::{debug, instrument, warn};
use tree_sitter::{Node, Parser};

use crate::ast::{
    Block, ContractDecl, ContractKind, ContractMember, EventDecl, Expression, ExpressionKind,
    FunctionDecl, FunctionKind, ModifierDecl, ParameterDecl, PragmaDirective, SourceItem,
    SourcePos, SourceUnit, StateVariableDecl, Statement, TypeName, UnsupportedNode, VariableDecl,
};
use crate::error::AuditError;

const VISIBILITY_TOKENS: [&str; 4] = ["public", "external", "internal", "private"];
const MUTABILITY_TOKENS: [&str; 4] = ["pure", "view", "payable", "constant"];
const STORAGE_TOKENS: [&str; 3] = ["memory", "storage", "calldata"];

/// Parses Solidity source into the typed tree.
///
/// Syntax errors are tolerated as long as at least one top-level declaration
/// was recognized; otherwise the source is rejected as a fatal parse error.
#[instrument(name = "parse_source", skip(source), fields(source_len = source.len()))]
pub fn parse_source(source: &str) -> Result<SourceUnit, AuditError> {
    let mut parser = Parser::new();
    let language = tree_sitter_solidity::LANGUAGE.into();
    parser
        .set_language(&language)
        .map_err(|err| AuditError::Grammar(err.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AuditError::fatal_parse("parser produced no syntax tree"))?;
    let root = tree.root_node();

    let lowering = Lowering { source };
    let unit = lowering.source_unit(root);
    let recognized = unit
        .items
        .iter()
        .filter(|item| !matches!(item, SourceItem::Unsupported(_)))
        .count();

    if root.has_error() {
        if recognized == 0 {
            return Err(AuditError::fatal_parse(format!(
                "syntax error near line {}",
                first_error_line(root).unwrap_or(1)
            )));
        }
        warn!(
            line = first_error_line(root).unwrap_or(0),
            "source contains syntax errors; continuing with recognized declarations"
        );
    }

    debug!(items = unit.items.len(), recognized, "parsed source unit");
    Ok(unit)
}

fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    if !node.has_error() {
        return None;
    }
    children(node).into_iter().find_map(first_error_line)
}

fn pos(node: Node<'_>) -> SourcePos {
    let start = node.start_position();
    SourcePos::new(start.row + 1, start.column)
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

fn is_statement_kind(kind: &str) -> bool {
    kind == "statement"
        || kind.ends_with("_statement")
        || kind == "unchecked_block"
        || kind == "function_body"
}

struct Lowering<'s> {
    source: &'s str,
}

impl<'s> Lowering<'s> {
    fn text(&self, node: Node<'_>) -> &'s str {
        self.source.get(node.byte_range()).unwrap_or("")
    }

    fn field_text(&self, node: Node<'_>, field: &str) -> Option<String> {
        node.child_by_field_name(field)
            .map(|child| self.text(child).trim().to_string())
            .filter(|text| !text.is_empty())
    }

    /// First direct child token (named or anonymous) whose text is one of `tokens`.
    fn token_among(&self, node: Node<'_>, wrapper: &str, tokens: &[&str]) -> Option<String> {
        children(node).into_iter().find_map(|child| {
            let kind = child.kind();
            if kind == wrapper || tokens.contains(&kind) {
                let text = self.text(child).trim();
                tokens
                    .iter()
                    .find(|token| **token == text)
                    .map(|token| token.to_string())
            } else {
                None
            }
        })
    }

    fn source_unit(&self, root: Node<'_>) -> SourceUnit {
        let items = named_children(root)
            .into_iter()
            .map(|child| match child.kind() {
                "pragma_directive" => SourceItem::Pragma(self.pragma(child)),
                "contract_declaration" | "interface_declaration" | "library_declaration" => {
                    SourceItem::Contract(self.contract(child))
                }
                _ => SourceItem::Unsupported(self.unsupported(child)),
            })
            .collect();
        SourceUnit { items }
    }

    fn pragma(&self, node: Node<'_>) -> PragmaDirective {
        let body = self
            .text(node)
            .trim()
            .trim_start_matches("pragma")
            .trim_end_matches(';')
            .trim();
        let (name, value) = body
            .split_once(char::is_whitespace)
            .map(|(name, value)| (name, value.trim()))
            .unwrap_or((body, ""));
        PragmaDirective {
            name: name.to_string(),
            value: value.to_string(),
            pos: pos(node),
        }
    }

    fn contract(&self, node: Node<'_>) -> ContractDecl {
        let kind = match node.kind() {
            "interface_declaration" => ContractKind::Interface,
            "library_declaration" => ContractKind::Library,
            _ if children(node).iter().any(|child| child.kind() == "abstract") => {
                ContractKind::AbstractContract
            }
            _ => ContractKind::Contract,
        };

        let bases = named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "inheritance_specifier")
            .filter_map(|spec| {
                spec.child_by_field_name("ancestor")
                    .or_else(|| named_children(spec).into_iter().next())
                    .map(|ancestor| compact(self.text(ancestor)))
            })
            .collect();

        let members = node
            .child_by_field_name("body")
            .map(|body| {
                named_children(body)
                    .into_iter()
                    .map(|member| self.member(member))
                    .collect()
            })
            .unwrap_or_default();

        ContractDecl {
            kind,
            name: self.field_text(node, "name"),
            bases,
            members,
            pos: pos(node),
            byte_range: node.byte_range(),
        }
    }

    fn member(&self, node: Node<'_>) -> ContractMember {
        match node.kind() {
            "function_definition" | "constructor_definition" | "fallback_receive_definition" => {
                ContractMember::Function(self.function(node))
            }
            "state_variable_declaration" => ContractMember::StateVariable(self.state_variable(node)),
            "event_definition" => ContractMember::Event(EventDecl {
                name: self.field_text(node, "name"),
                parameters: named_children(node)
                    .into_iter()
                    .filter(|child| child.kind() == "event_parameter")
                    .map(|param| self.parameter(param))
                    .collect(),
                pos: pos(node),
            }),
            "modifier_definition" => ContractMember::Modifier(ModifierDecl {
                name: self.field_text(node, "name"),
                parameters: self.parameters(node),
                body: self.body(node),
                pos: pos(node),
            }),
            _ => ContractMember::Unsupported(self.unsupported(node)),
        }
    }

    fn function(&self, node: Node<'_>) -> FunctionDecl {
        let kind = match node.kind() {
            "constructor_definition" => FunctionKind::Constructor,
            "fallback_receive_definition" => {
                if children(node).iter().any(|child| child.kind() == "receive") {
                    FunctionKind::Receive
                } else {
                    FunctionKind::Fallback
                }
            }
            _ => FunctionKind::Function,
        };

        let modifiers = named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "modifier_invocation")
            .filter_map(|invocation| {
                let path: Vec<_> = named_children(invocation)
                    .into_iter()
                    .filter(|part| part.kind() == "identifier")
                    .map(|part| self.text(part).to_string())
                    .collect();
                (!path.is_empty()).then(|| path.join("."))
            })
            .collect();

        let returns = named_children(node)
            .into_iter()
            .find(|child| child.kind() == "return_type_definition")
            .map(|returns| self.parameters(returns))
            .unwrap_or_default();

        FunctionDecl {
            kind,
            name: match kind {
                FunctionKind::Function => self.field_text(node, "name"),
                _ => None,
            },
            visibility: self.token_among(node, "visibility", &VISIBILITY_TOKENS),
            state_mutability: self.token_among(node, "state_mutability", &MUTABILITY_TOKENS),
            modifiers,
            parameters: self.parameters(node),
            returns,
            body: self.body(node),
            pos: pos(node),
        }
    }

    /// Parameters declared directly under `node`, looking through list wrappers.
    fn parameters(&self, node: Node<'_>) -> Vec<ParameterDecl> {
        let mut params = Vec::new();
        for child in named_children(node) {
            match child.kind() {
                "parameter" => params.push(self.parameter(child)),
                kind if kind.ends_with("parameter_list") || kind == "parameters" => {
                    params.extend(
                        named_children(child)
                            .into_iter()
                            .filter(|inner| inner.kind() == "parameter")
                            .map(|inner| self.parameter(inner)),
                    );
                }
                _ => {}
            }
        }
        params
    }

    fn parameter(&self, node: Node<'_>) -> ParameterDecl {
        let storage = self
            .field_text(node, "location")
            .or_else(|| self.token_among(node, "", &STORAGE_TOKENS));
        ParameterDecl {
            name: self.field_text(node, "name"),
            type_name: node
                .child_by_field_name("type")
                .map(|type_node| self.type_name(type_node)),
            storage,
        }
    }

    fn body(&self, node: Node<'_>) -> Option<Block> {
        node.child_by_field_name("body")
            .or_else(|| {
                named_children(node)
                    .into_iter()
                    .find(|child| child.kind() == "function_body")
            })
            .map(|body| self.block(body))
    }

    fn block(&self, node: Node<'_>) -> Block {
        Block {
            statements: named_children(node)
                .into_iter()
                .map(|child| self.statement(child))
                .collect(),
            pos: pos(node),
        }
    }

    fn state_variable(&self, node: Node<'_>) -> StateVariableDecl {
        let constant = children(node)
            .iter()
            .any(|child| matches!(child.kind(), "constant" | "immutable"));
        let variable = VariableDecl {
            name: self.field_text(node, "name"),
            type_name: node
                .child_by_field_name("type")
                .map(|type_node| self.type_name(type_node)),
            visibility: self.token_among(node, "visibility", &VISIBILITY_TOKENS),
            constant,
            initializer: node
                .child_by_field_name("value")
                .map(|value| self.expression(value)),
            pos: pos(node),
        };
        StateVariableDecl {
            variables: vec![variable],
            pos: pos(node),
        }
    }

    fn type_name(&self, node: Node<'_>) -> TypeName {
        match node.kind() {
            "primitive_type" => TypeName::Elementary(normalize_ws(self.text(node))),
            "user_defined_type" => TypeName::UserDefined(
                compact(self.text(node))
                    .split('.')
                    .map(str::to_string)
                    .collect(),
            ),
            "type_name" => {
                if let Some(key) = node.child_by_field_name("key_type") {
                    let value = node
                        .child_by_field_name("value_type")
                        .map(|value| self.type_name(value))
                        .unwrap_or_else(|| TypeName::Unsupported("mapping".into()));
                    return TypeName::Mapping {
                        key: Box::new(self.type_name(key)),
                        value: Box::new(value),
                    };
                }
                let inner = named_children(node).into_iter().next();
                let is_array = children(node).iter().any(|child| child.kind() == "[");
                match inner {
                    Some(inner) if is_array => TypeName::Array {
                        base: Box::new(self.type_name(inner)),
                    },
                    Some(inner) => self.type_name(inner),
                    None => TypeName::Unsupported(self.text(node).to_string()),
                }
            }
            "identifier" => TypeName::UserDefined(vec![self.text(node).to_string()]),
            other => TypeName::Unsupported(other.to_string()),
        }
    }

    fn statement(&self, node: Node<'_>) -> Statement {
        match node.kind() {
            "statement" => match named_children(node).into_iter().next() {
                Some(inner) => self.statement(inner),
                None => Statement::Unsupported(self.unsupported(node)),
            },
            "block_statement" | "function_body" => Statement::Block(self.block(node)),
            "unchecked_block" => {
                let inner = named_children(node)
                    .into_iter()
                    .find(|child| child.kind() == "block_statement")
                    .map(|block| self.block(block))
                    .unwrap_or_else(|| self.block(node));
                Statement::Unchecked(inner)
            }
            "expression_statement" => match named_children(node).into_iter().next() {
                Some(expr) => Statement::Expression(self.expression(expr)),
                None => Statement::Unsupported(self.unsupported(node)),
            },
            "variable_declaration_statement" => self.variable_declaration(node),
            "if_statement" => self.if_statement(node),
            "for_statement" => {
                let condition = node.child_by_field_name("condition").and_then(|cond| {
                    if cond.kind() == "expression_statement" {
                        named_children(cond)
                            .into_iter()
                            .next()
                            .map(|expr| self.expression(expr))
                    } else if cond.is_named() {
                        Some(self.expression(cond))
                    } else {
                        None
                    }
                });
                let body = node
                    .child_by_field_name("body")
                    .map(|body| self.statement(body))
                    .unwrap_or_else(|| Statement::Block(Block::default()));
                Statement::For {
                    init: node
                        .child_by_field_name("initial")
                        .filter(|init| init.is_named())
                        .map(|init| Box::new(self.statement(init))),
                    condition,
                    update: node
                        .child_by_field_name("update")
                        .map(|update| self.expression(update)),
                    body: Box::new(body),
                }
            }
            "while_statement" | "do_while_statement" => {
                let condition = node
                    .child_by_field_name("condition")
                    .map(|cond| self.expression(cond));
                let body = node.child_by_field_name("body").map(|body| self.statement(body));
                match (condition, body) {
                    (Some(condition), Some(body)) if node.kind() == "while_statement" => {
                        Statement::While {
                            condition,
                            body: Box::new(body),
                        }
                    }
                    (Some(condition), Some(body)) => Statement::DoWhile {
                        body: Box::new(body),
                        condition,
                    },
                    _ => Statement::Unsupported(self.unsupported(node)),
                }
            }
            "return_statement" => Statement::Return(
                named_children(node)
                    .into_iter()
                    .next()
                    .map(|expr| self.expression(expr)),
            ),
            "emit_statement" => match node.child_by_field_name("name") {
                Some(event) => Statement::Emit {
                    event: self.expression(event),
                    arguments: self.call_arguments(node),
                    pos: pos(node),
                },
                None => Statement::Unsupported(self.unsupported(node)),
            },
            "revert_statement" => Statement::Revert {
                error: node
                    .child_by_field_name("error")
                    .map(|error| self.expression(error)),
                arguments: self.call_arguments(node),
            },
            _ => Statement::Unsupported(self.unsupported(node)),
        }
    }

    fn if_statement(&self, node: Node<'_>) -> Statement {
        let condition = node
            .child_by_field_name("condition")
            .map(|cond| self.expression(cond));
        let then_branch = node
            .child_by_field_name("body")
            .map(|body| self.statement(body));
        match (condition, then_branch) {
            (Some(condition), Some(then_branch)) => Statement::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: node
                    .child_by_field_name("else")
                    .map(|other| Box::new(self.statement(other))),
            },
            _ => Statement::Unsupported(self.unsupported(node)),
        }
    }

    fn variable_declaration(&self, node: Node<'_>) -> Statement {
        let mut names = Vec::new();
        let mut type_names = Vec::new();
        let mut storage = Vec::new();

        let declared = |decl: Node<'_>| {
            (
                self.field_text(decl, "name"),
                decl.child_by_field_name("type")
                    .map(|type_node| self.type_name(type_node)),
                self.field_text(decl, "location")
                    .or_else(|| self.token_among(decl, "", &STORAGE_TOKENS)),
            )
        };

        for child in named_children(node) {
            match child.kind() {
                "variable_declaration" => {
                    let (name, type_name, location) = declared(child);
                    names.push(name);
                    type_names.push(type_name);
                    storage.push(location);
                }
                "variable_declaration_tuple" => {
                    // Skipped slots (`(, uint b)`) appear as consecutive commas.
                    let mut slot_filled = false;
                    for part in children(child) {
                        match part.kind() {
                            "variable_declaration" => {
                                let (name, type_name, location) = declared(part);
                                names.push(name);
                                type_names.push(type_name);
                                storage.push(location);
                                slot_filled = true;
                            }
                            "identifier" => {
                                names.push(Some(self.text(part).to_string()));
                                type_names.push(None);
                                storage.push(None);
                                slot_filled = true;
                            }
                            "," | ")" => {
                                if !slot_filled {
                                    names.push(None);
                                    type_names.push(None);
                                    storage.push(None);
                                }
                                slot_filled = false;
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        Statement::VariableDeclaration {
            names,
            type_names,
            storage,
            initializer: node
                .child_by_field_name("value")
                .map(|value| self.expression(value)),
            pos: pos(node),
        }
    }

    fn call_arguments(&self, node: Node<'_>) -> Vec<Expression> {
        named_children(node)
            .into_iter()
            .filter(|child| child.kind() == "call_argument")
            .map(|arg| match named_children(arg).as_slice() {
                [single] => self.expression(*single),
                _ => Expression::new(ExpressionKind::Unsupported(self.unsupported(arg)), pos(arg)),
            })
            .collect()
    }

    fn expression(&self, node: Node<'_>) -> Expression {
        let at = pos(node);
        let kind = match node.kind() {
            "expression" | "parenthesized_expression" | "call_argument" => {
                match named_children(node).as_slice() {
                    [single] => return self.expression(*single),
                    _ => ExpressionKind::Unsupported(self.unsupported(node)),
                }
            }
            "identifier" => ExpressionKind::Identifier(self.text(node).to_string()),
            "primitive_type" | "user_defined_type" => {
                ExpressionKind::Identifier(compact(self.text(node)))
            }
            kind if kind.ends_with("_literal") || kind == "string" => {
                ExpressionKind::Literal(self.text(node).to_string())
            }
            "member_expression" => {
                match (
                    node.child_by_field_name("object"),
                    self.field_text(node, "property"),
                ) {
                    (Some(object), Some(member)) => ExpressionKind::MemberAccess {
                        object: Box::new(self.expression(object)),
                        member,
                    },
                    _ => ExpressionKind::Unsupported(self.unsupported(node)),
                }
            }
            "call_expression" => match node.child_by_field_name("function") {
                Some(function) => self.call(node, function),
                None => ExpressionKind::Unsupported(self.unsupported(node)),
            },
            "type_cast_expression" | "payable_conversion_expression" => {
                let parts = named_children(node);
                let callee = match parts.first() {
                    Some(first) if first.kind() == "primitive_type" => compact(self.text(*first)),
                    _ => "payable".to_string(),
                };
                let arguments = parts
                    .into_iter()
                    .filter(|part| part.kind() != "primitive_type")
                    .map(|part| self.expression(part))
                    .collect();
                ExpressionKind::Call {
                    callee: Box::new(Expression::new(ExpressionKind::Identifier(callee), at)),
                    options: Vec::new(),
                    arguments,
                }
            }
            "array_access" | "index_expression" => match node.child_by_field_name("base") {
                Some(base) => ExpressionKind::Index {
                    base: Box::new(self.expression(base)),
                    index: node
                        .child_by_field_name("index")
                        .map(|index| Box::new(self.expression(index))),
                },
                None => ExpressionKind::Unsupported(self.unsupported(node)),
            },
            "binary_expression" | "assignment_expression" | "augmented_assignment_expression" => {
                match (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) {
                    (Some(left), Some(right)) => {
                        let operator = self
                            .field_text(node, "operator")
                            .unwrap_or_else(|| operator_between(self.source, left, right));
                        let left = Box::new(self.expression(left));
                        let right = Box::new(self.expression(right));
                        if node.kind() == "binary_expression" {
                            ExpressionKind::Binary {
                                left,
                                operator,
                                right,
                            }
                        } else {
                            ExpressionKind::Assignment {
                                left,
                                operator,
                                right,
                            }
                        }
                    }
                    _ => ExpressionKind::Unsupported(self.unsupported(node)),
                }
            }
            "unary_expression" | "update_expression" => match node
                .child_by_field_name("argument")
                .or_else(|| named_children(node).into_iter().next())
            {
                Some(operand) => ExpressionKind::Unary {
                    operator: self.field_text(node, "operator").unwrap_or_default(),
                    operand: Box::new(self.expression(operand)),
                },
                None => ExpressionKind::Unsupported(self.unsupported(node)),
            },
            "ternary_expression" => match named_children(node).as_slice() {
                [condition, then_value, else_value] => ExpressionKind::Conditional {
                    condition: Box::new(self.expression(*condition)),
                    then_value: Box::new(self.expression(*then_value)),
                    else_value: Box::new(self.expression(*else_value)),
                },
                _ => ExpressionKind::Unsupported(self.unsupported(node)),
            },
            "tuple_expression" | "inline_array_expression" => ExpressionKind::Tuple(
                named_children(node)
                    .into_iter()
                    .map(|element| self.expression(element))
                    .collect(),
            ),
            _ => ExpressionKind::Unsupported(self.unsupported(node)),
        };
        Expression::new(kind, at)
    }

    /// `f(args)`, `x.call{value: v}(args)`; call options live on a struct expression callee.
    fn call(&self, node: Node<'_>, function: Node<'_>) -> ExpressionKind {
        let mut callee = function;
        while callee.kind() == "expression" {
            match named_children(callee).as_slice() {
                [single] => callee = *single,
                _ => break,
            }
        }

        let (callee, options) = if callee.kind() == "struct_expression" {
            let target = callee
                .child_by_field_name("type")
                .or_else(|| named_children(callee).into_iter().next());
            let options = named_children(callee)
                .into_iter()
                .filter(|child| child.kind() == "struct_field_assignment")
                .filter_map(|assignment| {
                    assignment
                        .child_by_field_name("value")
                        .or_else(|| named_children(assignment).into_iter().last())
                })
                .map(|value| self.expression(value))
                .collect();
            match target {
                Some(target) => (self.expression(target), options),
                None => (self.expression(callee), Vec::new()),
            }
        } else {
            (self.expression(callee), Vec::new())
        };

        ExpressionKind::Call {
            callee: Box::new(callee),
            options,
            arguments: self.call_arguments(node),
        }
    }

    fn unsupported(&self, node: Node<'_>) -> UnsupportedNode {
        let mut carried = UnsupportedNode {
            kind: node.kind().to_string(),
            pos: pos(node),
            ..UnsupportedNode::default()
        };
        for child in named_children(node) {
            if is_statement_kind(child.kind()) {
                carried.statements.push(self.statement(child));
            } else {
                carried.expressions.push(self.expression(child));
            }
        }
        carried
    }
}

fn operator_between(source: &str, left: Node<'_>, right: Node<'_>) -> String {
    source
        .get(left.end_byte()..right.start_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

fn compact(text: &str) -> String {
    text.chars().filter(|ch| !ch.is_whitespace()).collect()
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solidity_grammar_loads_into_runtime() {
        let mut parser = Parser::new();
        let language = tree_sitter_solidity::LANGUAGE.into();
        parser
            .set_language(&language)
            .expect("grammar ABI must be accepted by the linked tree-sitter runtime");
        let unit = parse_source("contract A {}").expect("minimal contract parses");
        assert!(matches!(unit.items.as_slice(), [SourceItem::Contract(_)]));
    }

    const VAULT: &str = r#"// SPDX-License-Identifier: MIT
pragma solidity ^0.8.19;

import "./Ownable.sol";

contract Vault is Ownable, Pausable {
    mapping(address => uint256) public balances;
    address[] private holders;
    uint256 constant FEE = 3;

    event Deposited(address indexed who, uint256 amount);

    modifier nonReentrant() {
        _;
    }

    constructor() payable {}

    function withdraw(uint256 amount) external nonReentrant returns (bool) {
        (bool ok, ) = msg.sender.call{value: amount}("");
        require(ok, "transfer failed");
        emit Deposited(msg.sender, amount);
        return ok;
    }

    receive() external payable {}
}

interface IToken {
    function transfer(address to, uint256 value) external returns (bool);
}
"#;

    fn contracts(unit: &SourceUnit) -> Vec<&ContractDecl> {
        unit.contracts().collect()
    }

    fn functions(contract: &ContractDecl) -> Vec<&FunctionDecl> {
        contract
            .members
            .iter()
            .filter_map(|member| match member {
                ContractMember::Function(function) => Some(function),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn lowers_pragma_and_contract_headers() {
        let unit = parse_source(VAULT).expect("vault parses");
        let pragma = unit.solidity_pragma().expect("pragma recognized");
        assert_eq!(pragma.value, "^0.8.19");
        assert_eq!(pragma.pos.line, 2);

        let decls = contracts(&unit);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name.as_deref(), Some("Vault"));
        assert_eq!(decls[0].kind, ContractKind::Contract);
        assert_eq!(decls[0].bases, vec!["Ownable", "Pausable"]);
        assert_eq!(decls[1].kind, ContractKind::Interface);
    }

    #[test]
    fn lowers_function_signatures() {
        let unit = parse_source(VAULT).expect("vault parses");
        let vault = contracts(&unit)[0];
        let functions = functions(vault);

        let constructor = functions
            .iter()
            .find(|f| f.kind == FunctionKind::Constructor)
            .expect("constructor lowered");
        assert_eq!(constructor.state_mutability.as_deref(), Some("payable"));

        let withdraw = functions
            .iter()
            .find(|f| f.name.as_deref() == Some("withdraw"))
            .expect("withdraw lowered");
        assert_eq!(withdraw.visibility.as_deref(), Some("external"));
        assert_eq!(withdraw.modifiers, vec!["nonReentrant"]);
        assert_eq!(withdraw.parameters.len(), 1);
        assert_eq!(withdraw.parameters[0].name.as_deref(), Some("amount"));
        assert_eq!(
            withdraw.parameters[0].type_name,
            Some(TypeName::Elementary("uint256".into()))
        );
        assert_eq!(withdraw.returns.len(), 1);
        assert!(withdraw.body.is_some());

        assert!(functions.iter().any(|f| f.kind == FunctionKind::Receive));
    }

    #[test]
    fn lowers_call_options_onto_member_call() {
        let unit = parse_source(VAULT).expect("vault parses");
        let vault = contracts(&unit)[0];
        let withdraw = functions(vault)
            .into_iter()
            .find(|f| f.name.as_deref() == Some("withdraw"))
            .expect("withdraw lowered");
        let body = withdraw.body.as_ref().expect("body");

        let mut members = Vec::new();
        let mut option_counts = Vec::new();
        body.walk_expressions(&mut |expr| {
            if let ExpressionKind::Call { options, .. } = &expr.kind {
                if let Some(member) = expr.called_member() {
                    members.push(member.to_string());
                    option_counts.push(options.len());
                }
            }
        });
        assert_eq!(members, vec!["call"]);
        assert_eq!(option_counts, vec![1]);

        match &body.statements[0] {
            Statement::VariableDeclaration { names, .. } => {
                assert_eq!(names.first().cloned().flatten().as_deref(), Some("ok"));
            }
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn lowers_mapping_and_array_state_types() {
        let unit = parse_source(VAULT).expect("vault parses");
        let vault = contracts(&unit)[0];
        let vars: Vec<_> = vault
            .members
            .iter()
            .filter_map(|member| match member {
                ContractMember::StateVariable(decl) => Some(&decl.variables[0]),
                _ => None,
            })
            .collect();
        assert_eq!(vars.len(), 3);
        assert!(matches!(vars[0].type_name, Some(TypeName::Mapping { .. })));
        assert_eq!(vars[0].visibility.as_deref(), Some("public"));
        assert!(matches!(vars[1].type_name, Some(TypeName::Array { .. })));
        assert!(vars[2].constant);
    }

    #[test]
    fn rejects_source_without_any_declaration() {
        let err = parse_source("this is definitely not solidity {{{").expect_err("garbage");
        assert!(matches!(err, AuditError::FatalParse { .. }));
    }

    #[test]
    fn empty_source_is_an_empty_unit() {
        let unit = parse_source("").expect("empty parses");
        assert!(unit.items.is_empty());
    }

    #[test]
    fn contract_span_lookup_finds_enclosing_contract() {
        let unit = parse_source(VAULT).expect("vault parses");
        let offset = VAULT.find("balances").expect("present");
        assert_eq!(unit.contract_at(offset), Some("Vault"));
        assert_eq!(unit.contract_at(0), None);
    }
}
