//! Recursive-descent parser for Quartz.
//!
//! The parser owns the token stream and a cursor; binary expressions use
//! precedence climbing driven by the per-token precedence table. Struct
//! values are constructed with call syntax (`Point(x: 1, y: 2)`), so the
//! grammar has no brace-initializer ambiguity inside conditions.

pub mod ast;

use ast::*;

use crate::errors::{Error, Result};
use crate::lexer::{Token, TokenKind};
use crate::source_map::Span;

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    pub fn parse(mut self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        while !self.at(TokenKind::Eof) {
            exprs.push(self.parse_statement()?);
        }

        Ok(exprs)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.position.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let index = (self.position + offset).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }

        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.at(kind) {
            return Ok(self.next());
        }

        let token = self.peek();
        Err(Error::new(
            token.span,
            format!("expected '{}' but found '{}'", kind.str(), token.kind.str()),
        ))
    }

    fn try_expect(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            Some(self.next())
        } else {
            None
        }
    }

    fn expect_identifier(&mut self) -> Result<Ident> {
        let token = self.expect(TokenKind::Identifier)?;
        Ok(Ident {
            name: token.value,
            span: token.span,
        })
    }

    /// Close a generic argument list. A `>>` closing two nested lists is
    /// split in place so the outer list sees its own `>`.
    fn expect_generic_close(&mut self) -> Result<Span> {
        if self.at(TokenKind::Shr) {
            let token = &mut self.tokens[self.position];
            token.kind = TokenKind::Gt;

            let span = Span::new(token.span.start, token.span.start + 1, token.span.source);
            token.span.start += 1;
            return Ok(span);
        }

        Ok(self.expect(TokenKind::Gt)?.span)
    }

    // ------------------------------------------------------------------
    // Statements & declarations
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Expr> {
        let attrs = self.parse_attributes()?;
        let is_public = self.try_expect(TokenKind::Pub).is_some();

        let expr = match self.peek().kind {
            TokenKind::Func => self.parse_function(Linkage::None, is_public, attrs)?,
            TokenKind::Extern => self.parse_extern(is_public, attrs)?,
            TokenKind::Struct => self.parse_struct(is_public, attrs)?,
            TokenKind::Enum => self.parse_enum(is_public)?,
            TokenKind::Type => self.parse_type_alias(is_public)?,
            TokenKind::Trait => self.parse_trait(is_public)?,
            TokenKind::Let => self.parse_let(false, is_public)?,
            TokenKind::Const => self.parse_let(true, is_public)?,
            TokenKind::Import => self.parse_import()?,
            TokenKind::Module => self.parse_module()?,
            TokenKind::Impl => self.parse_impl()?,
            TokenKind::StaticAssert => self.parse_static_assert()?,
            TokenKind::Return => self.parse_return()?,
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::Break => {
                let token = self.next();
                self.expect(TokenKind::SemiColon)?;
                Expr::new(ExprKind::Break, token.span)
            }
            TokenKind::Continue => {
                let token = self.next();
                self.expect(TokenKind::SemiColon)?;
                Expr::new(ExprKind::Continue, token.span)
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::SemiColon)?;
                expr
            }
        };

        Ok(expr)
    }

    fn parse_attributes(&mut self) -> Result<Vec<Attribute>> {
        let mut attrs = Vec::new();

        while self.at(TokenKind::Hash) {
            let hash = self.next();
            self.expect(TokenKind::LBracket)?;
            let name = self.expect_identifier()?;

            let kind = match name.name.as_str() {
                "noreturn" => AttributeKind::NoReturn,
                "packed" => AttributeKind::Packed,
                "llvm_intrinsic" => {
                    self.expect(TokenKind::LParen)?;
                    let value = self.expect(TokenKind::String)?;
                    self.expect(TokenKind::RParen)?;
                    AttributeKind::LlvmIntrinsic(value.value)
                }
                "link" => AttributeKind::Link(self.parse_link_attribute()?),
                other => {
                    return Err(Error::new(name.span, format!("unknown attribute '{other}'")));
                }
            };

            let end = self.expect(TokenKind::RBracket)?;
            attrs.push(Attribute {
                kind,
                span: hash.span.merge(&end.span),
            });
        }

        Ok(attrs)
    }

    fn parse_link_attribute(&mut self) -> Result<LinkAttribute> {
        let mut link = LinkAttribute {
            name: None,
            arch: None,
            platform: None,
            section: None,
        };

        self.expect(TokenKind::LParen)?;
        loop {
            let key = self.expect_identifier()?;
            self.expect(TokenKind::Assign)?;
            let value = self.expect(TokenKind::String)?.value;

            let slot = match key.name.as_str() {
                "name" => &mut link.name,
                "arch" => &mut link.arch,
                "platform" => &mut link.platform,
                "section" => &mut link.section,
                other => {
                    return Err(Error::new(
                        key.span,
                        format!("invalid 'link' attribute key '{other}'"),
                    ));
                }
            };

            if slot.is_some() {
                return Err(Error::new(
                    key.span,
                    format!("a value for '{}' has already been provided", key.name),
                ));
            }
            *slot = Some(value);

            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        Ok(link)
    }

    fn parse_function(
        &mut self,
        linkage: Linkage,
        is_public: bool,
        attrs: Vec<Attribute>,
    ) -> Result<Expr> {
        let decl = self.parse_function_decl(linkage, is_public, attrs)?;
        let span = decl.span;

        Ok(Expr::new(ExprKind::Function(Box::new(decl)), span))
    }

    fn parse_function_decl(
        &mut self,
        linkage: Linkage,
        is_public: bool,
        attrs: Vec<Attribute>,
    ) -> Result<FunctionDecl> {
        let start = self.expect(TokenKind::Func)?;
        let name = self.expect_identifier()?;

        let generics = if self.at(TokenKind::Lt) {
            self.parse_generic_parameters()?
        } else {
            Vec::new()
        };

        let params = self.parse_function_parameters()?;

        let return_type = if self.try_expect(TokenKind::Arrow).is_some() {
            Some(self.parse_type()?)
        } else {
            None
        };

        let (body, end_span) = if self.at(TokenKind::LBrace) {
            let (block, span) = self.parse_block()?;
            (Some(block), span)
        } else {
            let semi = self.expect(TokenKind::SemiColon)?;
            (None, semi.span)
        };

        Ok(FunctionDecl {
            name,
            generics,
            params,
            return_type,
            body,
            is_public,
            linkage,
            attrs,
            span: start.span.merge(&end_span),
        })
    }

    fn parse_generic_parameters(&mut self) -> Result<Vec<GenericParameter>> {
        self.expect(TokenKind::Lt)?;
        let mut parameters = Vec::new();

        loop {
            let name = self.expect_identifier()?;

            let mut constraints = Vec::new();
            if self.try_expect(TokenKind::Colon).is_some() {
                constraints.push(self.parse_type()?);
                while self.try_expect(TokenKind::Add).is_some() {
                    constraints.push(self.parse_type()?);
                }
            }

            let default = if self.try_expect(TokenKind::Assign).is_some() {
                Some(self.parse_type()?)
            } else {
                None
            };

            parameters.push(GenericParameter {
                name,
                constraints,
                default,
            });

            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }

        self.expect(TokenKind::Gt)?;
        Ok(parameters)
    }

    fn parse_function_parameters(&mut self) -> Result<Vec<FunctionParameter>> {
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        let mut keyword_only = false;

        while !self.at(TokenKind::RParen) {
            // A bare `*` marks the start of keyword-only parameters.
            if self.at(TokenKind::Mul) && self.peek_at(1).kind == TokenKind::Comma {
                self.next();
                self.next();
                keyword_only = true;
                continue;
            }

            if self.at(TokenKind::Ellipsis) {
                let token = self.next();
                let name = self.expect_identifier().unwrap_or(Ident {
                    name: String::new(),
                    span: token.span,
                });

                params.push(FunctionParameter {
                    name,
                    ty: None,
                    is_self: false,
                    is_mutable: false,
                    is_keyword: false,
                    is_variadic: true,
                    span: token.span,
                });
                break;
            }

            let is_mutable = self.try_expect(TokenKind::Mut).is_some();
            let name = self.expect_identifier()?;

            if name.name == "self" {
                params.push(FunctionParameter {
                    span: name.span,
                    name,
                    ty: None,
                    is_self: true,
                    is_mutable,
                    is_keyword: false,
                    is_variadic: false,
                });
            } else {
                self.expect(TokenKind::Colon)?;
                let ty = self.parse_type()?;

                params.push(FunctionParameter {
                    span: name.span.merge(&ty.span),
                    name,
                    ty: Some(ty),
                    is_self: false,
                    is_mutable,
                    is_keyword: keyword_only,
                    is_variadic: false,
                });
            }

            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }

        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_extern(&mut self, is_public: bool, attrs: Vec<Attribute>) -> Result<Expr> {
        let start = self.expect(TokenKind::Extern)?;

        let linkage = if self.at(TokenKind::String) {
            let abi = self.next();
            if abi.value != "C" {
                return Err(Error::new(
                    abi.span,
                    format!("unknown linkage specifier '{}'", abi.value),
                ));
            }
            Linkage::C
        } else {
            Linkage::Unspecified
        };

        // `extern "C" { ... }` groups several declarations.
        if self.at(TokenKind::LBrace) {
            self.next();
            let mut decls = Vec::new();

            while !self.at(TokenKind::RBrace) {
                let attrs = self.parse_attributes()?;
                let decl = self.parse_function_decl(linkage, is_public, attrs)?;
                let span = decl.span;
                decls.push(Expr::new(ExprKind::Function(Box::new(decl)), span));
            }

            let end = self.expect(TokenKind::RBrace)?;
            return Ok(Expr::new(ExprKind::Block(decls), start.span.merge(&end.span)));
        }

        self.parse_function(linkage, is_public, attrs)
    }

    fn parse_struct(&mut self, is_public: bool, attrs: Vec<Attribute>) -> Result<Expr> {
        let start = self.expect(TokenKind::Struct)?;
        let name = self.expect_identifier()?;

        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();

        while !self.at(TokenKind::RBrace) {
            let is_field_public = self.try_expect(TokenKind::Pub).is_some();
            let is_mutable = self.try_expect(TokenKind::Mut).is_some();

            let mut is_readonly = false;
            if self.at(TokenKind::Identifier) && self.peek().value == "readonly" {
                self.next();
                is_readonly = true;
            }

            let field_name = self.expect_identifier()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;

            fields.push(StructFieldDecl {
                name: field_name,
                ty,
                is_public: is_field_public,
                is_readonly,
                is_mutable,
            });

            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }

        let end = self.expect(TokenKind::RBrace)?;

        Ok(Expr::new(
            ExprKind::StructDecl {
                name,
                fields,
                attrs,
                is_public,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_enum(&mut self, is_public: bool) -> Result<Expr> {
        let start = self.expect(TokenKind::Enum)?;
        let name = self.expect_identifier()?;

        let underlying = if self.try_expect(TokenKind::Colon).is_some() {
            Some(self.parse_type()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;
        let mut variants = Vec::new();

        while !self.at(TokenKind::RBrace) {
            let variant = self.expect_identifier()?;
            let value = if self.try_expect(TokenKind::Assign).is_some() {
                Some(self.parse_expr()?)
            } else {
                None
            };

            variants.push((variant, value));
            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }

        let end = self.expect(TokenKind::RBrace)?;

        Ok(Expr::new(
            ExprKind::EnumDecl {
                name,
                underlying,
                variants,
                is_public,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_type_alias(&mut self, is_public: bool) -> Result<Expr> {
        let start = self.expect(TokenKind::Type)?;
        let name = self.expect_identifier()?;

        let generics = if self.at(TokenKind::Lt) {
            self.parse_generic_parameters()?
        } else {
            Vec::new()
        };

        self.expect(TokenKind::Assign)?;
        let ty = self.parse_type()?;
        let end = self.expect(TokenKind::SemiColon)?;

        Ok(Expr::new(
            ExprKind::TypeAliasDecl {
                name,
                generics,
                ty,
                is_public,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_trait(&mut self, is_public: bool) -> Result<Expr> {
        let start = self.expect(TokenKind::Trait)?;
        let name = self.expect_identifier()?;

        self.expect(TokenKind::LBrace)?;
        let mut methods = Vec::new();

        while !self.at(TokenKind::RBrace) {
            let attrs = self.parse_attributes()?;
            methods.push(self.parse_function_decl(Linkage::None, true, attrs)?);
        }

        let end = self.expect(TokenKind::RBrace)?;

        Ok(Expr::new(
            ExprKind::TraitDecl {
                name,
                methods,
                is_public,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_let(&mut self, is_const: bool, is_public: bool) -> Result<Expr> {
        let start = self.next(); // `let` or `const`
        let is_mutable = !is_const && self.try_expect(TokenKind::Mut).is_some();

        let target = if self.at(TokenKind::LParen) {
            self.next();
            let mut items = Vec::new();

            loop {
                if self.try_expect(TokenKind::Mul).is_some() {
                    items.push(TuplePatternItem::Rest(self.expect_identifier()?));
                } else {
                    items.push(TuplePatternItem::Name(self.expect_identifier()?));
                }

                if self.try_expect(TokenKind::Comma).is_none() {
                    break;
                }
            }

            self.expect(TokenKind::RParen)?;
            LetTarget::Tuple(items)
        } else {
            LetTarget::Name(self.expect_identifier()?)
        };

        let ty = if self.try_expect(TokenKind::Colon).is_some() {
            Some(self.parse_type()?)
        } else {
            None
        };

        let value = if self.try_expect(TokenKind::Assign).is_some() {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };

        let end = self.expect(TokenKind::SemiColon)?;

        Ok(Expr::new(
            ExprKind::Let {
                target,
                ty,
                value,
                is_mutable,
                is_const,
                is_public,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_import(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::Import)?;
        let path = self.parse_path()?;
        let end = self.expect(TokenKind::SemiColon)?;

        Ok(Expr::new(
            ExprKind::Import { path },
            start.span.merge(&end.span),
        ))
    }

    fn parse_module(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::Module)?;
        let name = self.expect_identifier()?;
        let (body, end_span) = self.parse_block()?;

        Ok(Expr::new(
            ExprKind::ModuleDecl { name, body },
            start.span.merge(&end_span),
        ))
    }

    fn parse_impl(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::Impl)?;

        let mut generics = Vec::new();
        if self.try_expect(TokenKind::Lt).is_some() {
            loop {
                generics.push(self.expect_identifier()?);
                if self.try_expect(TokenKind::Comma).is_none() {
                    break;
                }
            }
            self.expect(TokenKind::Gt)?;
        }

        let ty = self.parse_type()?;
        let (body, end_span) = self.parse_block()?;

        Ok(Expr::new(
            ExprKind::Impl { generics, ty, body },
            start.span.merge(&end_span),
        ))
    }

    fn parse_static_assert(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::StaticAssert)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::Comma)?;
        let message = self.expect(TokenKind::String)?.value;
        self.expect(TokenKind::RParen)?;
        let end = self.expect(TokenKind::SemiColon)?;

        Ok(Expr::new(
            ExprKind::StaticAssert {
                condition: Box::new(condition),
                message,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_return(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::Return)?;

        let value = if self.at(TokenKind::SemiColon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        let end = self.expect(TokenKind::SemiColon)?;
        Ok(Expr::new(
            ExprKind::Return(value),
            start.span.merge(&end.span),
        ))
    }

    fn parse_if(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::If)?;
        let condition = self.parse_expr()?;
        let (then_block, mut end_span) = self.parse_block()?;

        let else_block = if self.try_expect(TokenKind::Else).is_some() {
            if self.at(TokenKind::If) {
                let nested = self.parse_if()?;
                end_span = nested.span;
                Some(vec![nested])
            } else {
                let (block, span) = self.parse_block()?;
                end_span = span;
                Some(block)
            }
        } else {
            None
        };

        Ok(Expr::new(
            ExprKind::If {
                condition: Box::new(condition),
                then_block,
                else_block,
            },
            start.span.merge(&end_span),
        ))
    }

    fn parse_while(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::While)?;
        let condition = self.parse_expr()?;
        let (body, end_span) = self.parse_block()?;

        Ok(Expr::new(
            ExprKind::While {
                condition: Box::new(condition),
                body,
            },
            start.span.merge(&end_span),
        ))
    }

    fn parse_block(&mut self) -> Result<(Vec<Expr>, Span)> {
        let start = self.expect(TokenKind::LBrace)?;
        let mut exprs = Vec::new();

        while !self.at(TokenKind::RBrace) && !self.at(TokenKind::Eof) {
            exprs.push(self.parse_statement()?);
        }

        let end = self.expect(TokenKind::RBrace)?;
        Ok((exprs, start.span.merge(&end.span)))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_ternary()?;

        let compound = match self.peek().kind {
            TokenKind::Assign => None,
            TokenKind::AddAssign => Some(BinaryOp::Add),
            TokenKind::SubAssign => Some(BinaryOp::Sub),
            TokenKind::MulAssign => Some(BinaryOp::Mul),
            TokenKind::DivAssign => Some(BinaryOp::Div),
            _ => return Ok(target),
        };

        self.next();
        let value = self.parse_assignment()?;
        let span = target.span.merge(&value.span);

        // `a += b` is sugar for `a = a + b`.
        let value = match compound {
            Some(op) => Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(target.clone()),
                    rhs: Box::new(value),
                },
                span,
            ),
            None => value,
        };

        Ok(Expr::new(
            ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let condition = self.parse_binary(0)?;

        if self.try_expect(TokenKind::Question).is_none() {
            return Ok(condition);
        }

        let true_value = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let false_value = self.parse_expr()?;
        let span = condition.span.merge(&false_value.span);

        Ok(Expr::new(
            ExprKind::Ternary {
                condition: Box::new(condition),
                true_value: Box::new(true_value),
                false_value: Box::new(false_value),
            },
            span,
        ))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr> {
        let mut lhs = self.parse_operand()?;

        while let Some(precedence) = self.peek().kind.precedence() {
            if precedence < min_precedence {
                break;
            }

            let op = binary_op_for(self.next().kind);
            let rhs = self.parse_binary(precedence + 1)?;
            let span = lhs.span.merge(&rhs.span);

            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        Ok(lhs)
    }

    /// A unary expression followed by any number of `as` casts.
    fn parse_operand(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;

        while self.try_expect(TokenKind::As).is_some() {
            let ty = self.parse_type()?;
            let span = expr.span.merge(&ty.span);

            expr = Expr::new(
                ExprKind::Cast {
                    value: Box::new(expr),
                    ty,
                },
                span,
            );
        }

        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek().kind {
            TokenKind::Sub => UnaryOp::Neg,
            TokenKind::Not => UnaryOp::Not,
            TokenKind::BinaryNot => UnaryOp::BinaryNot,
            TokenKind::Mul => UnaryOp::Deref,
            TokenKind::And => {
                let start = self.next();
                let mutable = self.try_expect(TokenKind::Mut).is_some();
                let value = self.parse_unary()?;
                let span = start.span.merge(&value.span);

                return Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Ref { mutable },
                        value: Box::new(value),
                    },
                    span,
                ));
            }
            _ => return self.parse_postfix(),
        };

        let start = self.next();
        let value = self.parse_unary()?;
        let span = start.span.merge(&value.span);

        Ok(Expr::new(
            ExprKind::Unary {
                op,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let (args, kwargs, end_span) = self.parse_call_arguments()?;
                    let span = expr.span.merge(&end_span);

                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            kwargs,
                        },
                        span,
                    );
                }
                TokenKind::LBracket => {
                    self.next();
                    let index = self.parse_expr()?;
                    let end = self.expect(TokenKind::RBracket)?;
                    let span = expr.span.merge(&end.span);

                    expr = Expr::new(
                        ExprKind::Index {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                TokenKind::Dot => {
                    self.next();
                    let field = self.expect_identifier()?;
                    let span = expr.span.merge(&field.span);

                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            field,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(Ident, Expr)>, Span)> {
        self.expect(TokenKind::LParen)?;

        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while !self.at(TokenKind::RParen) {
            // `name: value` is a keyword argument.
            if self.at(TokenKind::Identifier) && self.peek_at(1).kind == TokenKind::Colon {
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Colon)?;
                kwargs.push((name, self.parse_expr()?));
            } else {
                let arg = self.parse_expr()?;
                if !kwargs.is_empty() {
                    return Err(Error::new(
                        arg.span,
                        "positional arguments may not follow keyword arguments",
                    ));
                }
                args.push(arg);
            }

            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }

        let end = self.expect(TokenKind::RParen)?;
        Ok((args, kwargs, end.span))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();

        let expr = match token.kind {
            TokenKind::Integer => {
                self.next();
                let value: u64 = token.value.parse().map_err(|_| {
                    Error::new(token.span, format!("integer literal '{}' is too large", token.value))
                })?;

                Expr::new(ExprKind::Integer(value), token.span)
            }
            TokenKind::Float => {
                self.next();
                let value: f64 = token.value.parse().map_err(|_| {
                    Error::new(token.span, format!("invalid float literal '{}'", token.value))
                })?;

                Expr::new(ExprKind::Float(value), token.span)
            }
            TokenKind::String => {
                self.next();
                Expr::new(ExprKind::String(token.value), token.span)
            }
            TokenKind::Char => {
                self.next();
                let value = token.value.chars().next().unwrap();
                Expr::new(ExprKind::Char(value), token.span)
            }
            TokenKind::True => {
                self.next();
                Expr::new(ExprKind::Bool(true), token.span)
            }
            TokenKind::False => {
                self.next();
                Expr::new(ExprKind::Bool(false), token.span)
            }
            TokenKind::Null => {
                self.next();
                Expr::new(ExprKind::Null, token.span)
            }
            TokenKind::Identifier => {
                if self.peek_at(1).kind == TokenKind::DoubleColon {
                    let path = self.parse_path()?;
                    let span = path.span;
                    Expr::new(ExprKind::Path(path), span)
                } else {
                    self.next();
                    Expr::new(ExprKind::Identifier(token.value), token.span)
                }
            }
            TokenKind::Sizeof => {
                self.next();
                self.expect(TokenKind::LParen)?;
                let ty = self.parse_type()?;
                let end = self.expect(TokenKind::RParen)?;

                Expr::new(ExprKind::Sizeof { ty }, token.span.merge(&end.span))
            }
            TokenKind::Offsetof => {
                self.next();
                self.expect(TokenKind::LParen)?;
                let ty = self.parse_type()?;
                self.expect(TokenKind::Comma)?;
                let field = self.expect_identifier()?;
                let end = self.expect(TokenKind::RParen)?;

                Expr::new(ExprKind::Offsetof { ty, field }, token.span.merge(&end.span))
            }
            TokenKind::Match => self.parse_match()?,
            TokenKind::LParen => {
                self.next();

                let first = self.parse_expr()?;
                if self.try_expect(TokenKind::Comma).is_some() {
                    let mut elements = vec![first];
                    while !self.at(TokenKind::RParen) {
                        elements.push(self.parse_expr()?);
                        if self.try_expect(TokenKind::Comma).is_none() {
                            break;
                        }
                    }

                    let end = self.expect(TokenKind::RParen)?;
                    Expr::new(ExprKind::Tuple(elements), token.span.merge(&end.span))
                } else {
                    self.expect(TokenKind::RParen)?;
                    first
                }
            }
            TokenKind::LBracket => {
                self.next();
                let mut elements = Vec::new();

                while !self.at(TokenKind::RBracket) {
                    elements.push(self.parse_expr()?);
                    if self.try_expect(TokenKind::Comma).is_none() {
                        break;
                    }
                }

                let end = self.expect(TokenKind::RBracket)?;
                Expr::new(ExprKind::Array(elements), token.span.merge(&end.span))
            }
            TokenKind::LBrace => {
                let (block, span) = self.parse_block()?;
                Expr::new(ExprKind::Block(block), span)
            }
            _ => {
                return Err(Error::new(
                    token.span,
                    format!("expected an expression but found '{}'", token.kind.str()),
                ));
            }
        };

        Ok(expr)
    }

    fn parse_match(&mut self) -> Result<Expr> {
        let start = self.expect(TokenKind::Match)?;
        let value = self.parse_expr()?;

        self.expect(TokenKind::LBrace)?;
        let mut arms = Vec::new();

        while !self.at(TokenKind::RBrace) {
            let pattern = if self.at(TokenKind::Identifier) && self.peek().value == "_" {
                self.next();
                None
            } else {
                Some(self.parse_expr()?)
            };

            self.expect(TokenKind::FatArrow)?;
            let body = if self.at(TokenKind::LBrace) {
                let (block, span) = self.parse_block()?;
                Expr::new(ExprKind::Block(block), span)
            } else {
                self.parse_expr()?
            };

            let span = pattern
                .as_ref()
                .map(|pattern| pattern.span.merge(&body.span))
                .unwrap_or(body.span);
            arms.push(MatchArm { pattern, body, span });

            if self.try_expect(TokenKind::Comma).is_none() {
                break;
            }
        }

        let end = self.expect(TokenKind::RBrace)?;

        Ok(Expr::new(
            ExprKind::Match {
                value: Box::new(value),
                arms,
            },
            start.span.merge(&end.span),
        ))
    }

    fn parse_path(&mut self) -> Result<Path> {
        let first = self.expect_identifier()?;
        let mut span = first.span;
        let mut segments = vec![first];

        while self.try_expect(TokenKind::DoubleColon).is_some() {
            let segment = self.expect_identifier()?;
            span = span.merge(&segment.span);
            segments.push(segment);
        }

        Ok(Path { segments, span })
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn parse_type(&mut self) -> Result<TypeExpr> {
        let token = self.peek().clone();

        let ty = match token.kind {
            TokenKind::Mul => {
                self.next();
                let mutable = self.try_expect(TokenKind::Mut).is_some();
                let pointee = self.parse_type()?;
                let span = token.span.merge(&pointee.span);

                TypeExpr {
                    kind: TypeExprKind::Pointer {
                        pointee: Box::new(pointee),
                        mutable,
                    },
                    span,
                }
            }
            TokenKind::And => {
                self.next();
                let mutable = self.try_expect(TokenKind::Mut).is_some();
                let inner = self.parse_type()?;
                let span = token.span.merge(&inner.span);

                TypeExpr {
                    kind: TypeExprKind::Reference {
                        inner: Box::new(inner),
                        mutable,
                    },
                    span,
                }
            }
            TokenKind::LBracket => {
                self.next();
                let element = self.parse_type()?;
                self.expect(TokenKind::SemiColon)?;
                let size = self.parse_expr()?;
                let end = self.expect(TokenKind::RBracket)?;

                TypeExpr {
                    kind: TypeExprKind::Array {
                        element: Box::new(element),
                        size: Box::new(size),
                    },
                    span: token.span.merge(&end.span),
                }
            }
            TokenKind::LParen => {
                self.next();
                let mut elements = Vec::new();

                while !self.at(TokenKind::RParen) {
                    elements.push(self.parse_type()?);
                    if self.try_expect(TokenKind::Comma).is_none() {
                        break;
                    }
                }

                let end = self.expect(TokenKind::RParen)?;

                // `(T)` is just a parenthesized type, not a tuple.
                if elements.len() == 1 {
                    elements.pop().unwrap()
                } else {
                    TypeExpr {
                        kind: TypeExprKind::Tuple { elements },
                        span: token.span.merge(&end.span),
                    }
                }
            }
            TokenKind::Func => {
                self.next();
                self.expect(TokenKind::LParen)?;

                let mut params = Vec::new();
                let mut var_arg = false;

                while !self.at(TokenKind::RParen) {
                    if self.try_expect(TokenKind::Ellipsis).is_some() {
                        var_arg = true;
                        break;
                    }

                    params.push(self.parse_type()?);
                    if self.try_expect(TokenKind::Comma).is_none() {
                        break;
                    }
                }

                let mut span = token.span.merge(&self.expect(TokenKind::RParen)?.span);
                let return_type = if self.try_expect(TokenKind::Arrow).is_some() {
                    let ty = self.parse_type()?;
                    span = span.merge(&ty.span);
                    Some(Box::new(ty))
                } else {
                    None
                };

                TypeExpr {
                    kind: TypeExprKind::Function {
                        params,
                        return_type,
                        var_arg,
                    },
                    span,
                }
            }
            TokenKind::Identifier => {
                let path = self.parse_path()?;
                let mut span = path.span;

                let mut args = Vec::new();
                if self.try_expect(TokenKind::Lt).is_some() {
                    while !self.at(TokenKind::Gt) && !self.at(TokenKind::Shr) {
                        args.push(self.parse_type()?);
                        if self.try_expect(TokenKind::Comma).is_none() {
                            break;
                        }
                    }

                    let close = self.expect_generic_close()?;
                    span = span.merge(&close);
                }

                TypeExpr {
                    kind: TypeExprKind::Named { path, args },
                    span,
                }
            }
            _ => {
                return Err(Error::new(
                    token.span,
                    format!("expected a type but found '{}'", token.kind.str()),
                ));
            }
        };

        Ok(ty)
    }
}

fn binary_op_for(kind: TokenKind) -> BinaryOp {
    match kind {
        TokenKind::Add => BinaryOp::Add,
        TokenKind::Sub => BinaryOp::Sub,
        TokenKind::Mul => BinaryOp::Mul,
        TokenKind::Div => BinaryOp::Div,
        TokenKind::Mod => BinaryOp::Mod,
        TokenKind::Or => BinaryOp::Or,
        TokenKind::And => BinaryOp::And,
        TokenKind::Xor => BinaryOp::Xor,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::LogicalOr => BinaryOp::LogicalOr,
        TokenKind::LogicalAnd => BinaryOp::LogicalAnd,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Neq => BinaryOp::Neq,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Gte => BinaryOp::Gte,
        TokenKind::Lte => BinaryOp::Lte,
        _ => unreachable!("token '{}' is not a binary operator", kind.str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(input: &str) -> Vec<Expr> {
        let tokens = Lexer::new(input, 1).lex().unwrap();
        Parser::new(tokens).parse().unwrap()
    }

    fn parse_single_expr(input: &str) -> Expr {
        let mut exprs = parse(&format!("{input};"));
        assert_eq!(exprs.len(), 1);
        exprs.pop().unwrap()
    }

    #[test]
    fn test_parse_function() {
        let exprs = parse("func add(a: i32, b: i32) -> i32 { return a + b; }");

        let ExprKind::Function(decl) = &exprs[0].kind else {
            panic!("expected a function");
        };

        assert_eq!(decl.name.name, "add");
        assert_eq!(decl.params.len(), 2);
        assert!(decl.return_type.is_some());
        assert_eq!(decl.body.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_precedence() {
        let expr = parse_single_expr("1 + 2 * 3");

        let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
            panic!("expected a binary expression");
        };

        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_parse_cast_chain() {
        let expr = parse_single_expr("300 as i8 as i32");

        let ExprKind::Cast { value, .. } = &expr.kind else {
            panic!("expected a cast");
        };
        assert!(matches!(value.kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn test_parse_pointer_types() {
        let exprs = parse("let p: *mut i32 = null; let r: &u8 = &x;");

        let ExprKind::Let { ty: Some(ty), .. } = &exprs[0].kind else {
            panic!("expected a let with a type");
        };
        assert!(matches!(
            ty.kind,
            TypeExprKind::Pointer { mutable: true, .. }
        ));
    }

    #[test]
    fn test_parse_generic_alias() {
        let exprs = parse("type Pair<T> = (T, T);");

        let ExprKind::TypeAliasDecl { generics, ty, .. } = &exprs[0].kind else {
            panic!("expected a type alias");
        };
        assert_eq!(generics.len(), 1);
        assert!(matches!(ty.kind, TypeExprKind::Tuple { .. }));
    }

    #[test]
    fn test_parse_call_with_keyword_arguments() {
        let expr = parse_single_expr("make(1, 2, flag: true)");

        let ExprKind::Call { args, kwargs, .. } = &expr.kind else {
            panic!("expected a call");
        };
        assert_eq!(args.len(), 2);
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs[0].0.name, "flag");
    }

    #[test]
    fn test_parse_match() {
        let exprs = parse("func f(x: i32) -> i32 { return match x { 1 => 10, _ => 0 }; }");

        let ExprKind::Function(decl) = &exprs[0].kind else {
            panic!("expected a function");
        };
        let ExprKind::Return(Some(value)) = &decl.body.as_ref().unwrap()[0].kind else {
            panic!("expected a return");
        };
        let ExprKind::Match { arms, .. } = &value.kind else {
            panic!("expected a match");
        };

        assert_eq!(arms.len(), 2);
        assert!(arms[1].pattern.is_none());
    }

    #[test]
    fn test_parse_import_path() {
        let exprs = parse("import core::mem;");

        let ExprKind::Import { path } = &exprs[0].kind else {
            panic!("expected an import");
        };
        assert_eq!(path.segments.len(), 2);
        assert_eq!(path.segments[1].name, "mem");
    }

    #[test]
    fn test_parse_tuple_destructuring() {
        let exprs = parse("let (a, *rest, b) = value;");

        let ExprKind::Let {
            target: LetTarget::Tuple(items),
            ..
        } = &exprs[0].kind
        else {
            panic!("expected a tuple let");
        };

        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], TuplePatternItem::Rest(_)));
    }

    #[test]
    fn test_parse_attributes() {
        let exprs = parse("#[link(name = \"malloc\")] extern \"C\" func malloc(size: u64) -> *mut u8;");

        let ExprKind::Function(decl) = &exprs[0].kind else {
            panic!("expected a function");
        };
        assert_eq!(decl.linkage, Linkage::C);

        let AttributeKind::Link(link) = &decl.attrs[0].kind else {
            panic!("expected a link attribute");
        };
        assert_eq!(link.name.as_deref(), Some("malloc"));
    }

    #[test]
    fn test_parse_error_reports_expected_token() {
        let tokens = Lexer::new("func f(", 1).lex().unwrap();
        let error = Parser::new(tokens).parse().unwrap_err();
        assert!(error.message().starts_with("expected"));
    }

    #[test]
    fn test_parse_compound_assignment_desugars() {
        let expr = parse_single_expr("a += 1");

        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected an assignment");
        };
        assert!(matches!(
            value.kind,
            ExprKind::Binary { op: BinaryOp::Add, .. }
        ));
    }
}
