// File: src/parser.rs
//
// Recursive-descent / precedence-climbing parser turning a token stream
// into AST node shapes for the compiler. Kept just complete enough to
// drive the compiler end to end.

use crate::ast::*;
use crate::errors::{Diagnostic, SourceLocation};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<Diagnostic>,
}

type PResult<T> = Result<T, Diagnostic>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0, errors: Vec::new() }
    }

    pub fn parse_program(mut self) -> Result<Vec<Stmt>, Vec<Diagnostic>> {
        let mut stmts = Vec::new();
        while !self.check_eof() {
            match self.statement() {
                Ok(s) => stmts.push(s),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        if self.errors.is_empty() {
            Ok(stmts)
        } else {
            Err(self.errors)
        }
    }

    // ---- token stream helpers ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos - 1]
    }

    fn check_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> &Token {
        if !self.check_eof() {
            self.pos += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_kw(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if *k == kw)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn matches_kw(&mut self, kw: &str) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<&Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> PResult<String> {
        match self.peek().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {}", what))),
        }
    }

    fn loc(&self) -> SourceLocation {
        let t = self.peek();
        SourceLocation::new(t.line, t.column)
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::syntax(message, self.loc())
    }

    fn synchronize(&mut self) {
        self.advance();
        while !self.check_eof() {
            if matches!(self.previous().kind, TokenKind::Semicolon | TokenKind::RBrace) {
                return;
            }
            if matches!(
                self.peek().kind,
                TokenKind::Keyword("var" | "fun" | "class" | "if" | "while" | "for" | "return" | "try" | "import")
            ) {
                return;
            }
            self.advance();
        }
    }

    // ---- statements ----

    fn statement(&mut self) -> PResult<Stmt> {
        if self.matches_kw("var") {
            return self.var_decl();
        }
        if self.matches_kw("if") {
            return self.if_stmt();
        }
        if self.matches_kw("while") {
            return self.while_stmt();
        }
        if self.matches_kw("for") {
            return self.for_stmt();
        }
        if self.matches_kw("return") {
            return self.return_stmt();
        }
        if self.matches_kw("fun") {
            return Ok(Stmt::FunctionDecl(self.function_rest(true)?));
        }
        if self.matches_kw("class") {
            return self.class_decl();
        }
        if self.matches_kw("try") {
            return self.try_stmt();
        }
        if self.matches_kw("raise") {
            let line = self.previous().line;
            let expr = self.expression()?;
            self.consume_stmt_end();
            return Ok(Stmt::Raise(expr, line));
        }
        if self.matches_kw("import") {
            let line = self.previous().line;
            let name = self.expect_identifier("module name")?;
            let alias = if self.matches_kw("as") {
                Some(self.expect_identifier("alias name")?)
            } else {
                None
            };
            self.consume_stmt_end();
            return Ok(Stmt::Import { name, alias, line });
        }
        if self.matches_kw("break") {
            let line = self.previous().line;
            self.consume_stmt_end();
            return Ok(Stmt::Break(line));
        }
        if self.matches_kw("continue") {
            let line = self.previous().line;
            self.consume_stmt_end();
            return Ok(Stmt::Continue(line));
        }
        if self.check(&TokenKind::LBrace) {
            return Ok(Stmt::Block(self.block()?));
        }
        let expr = self.expression()?;
        self.consume_stmt_end();
        Ok(Stmt::Expression(expr))
    }

    fn consume_stmt_end(&mut self) {
        // Semicolons are optional terminators; swallow one if present.
        self.matches(&TokenKind::Semicolon);
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check_eof() {
            stmts.push(self.statement()?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    fn var_decl(&mut self) -> PResult<Stmt> {
        let line = self.previous().line;
        let name = self.expect_identifier("variable name")?;
        let init = if self.matches(&TokenKind::Eq) { Some(self.expression()?) } else { None };
        self.consume_stmt_end();
        Ok(Stmt::VarDecl { name, init, line })
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        let cond = self.expression()?;
        let then_branch = self.block()?;
        let mut elifs = Vec::new();
        let mut else_branch = None;
        loop {
            if self.matches_kw("elif") {
                let c = self.expression()?;
                let b = self.block()?;
                elifs.push((c, b));
            } else if self.matches_kw("else") {
                else_branch = Some(self.block()?);
                break;
            } else {
                break;
            }
        }
        Ok(Stmt::If { cond, then_branch, elifs, else_branch })
    }

    fn while_stmt(&mut self) -> PResult<Stmt> {
        let cond = self.expression()?;
        let body = self.block()?;
        Ok(Stmt::While { cond, body })
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        // Disambiguate `for x in expr { }` from `for init; cond; post { }`.
        if let TokenKind::Identifier(name) = self.peek().kind.clone() {
            let save = self.pos;
            self.advance();
            if self.matches_kw("in") {
                let line = self.previous().line;
                let iterable = self.expression()?;
                let body = self.block()?;
                return Ok(Stmt::ForEach { var: name, iterable, body, line });
            }
            self.pos = save;
        }

        let init = if self.check(&TokenKind::Semicolon) {
            None
        } else if self.matches_kw("var") {
            Some(Box::new(self.var_decl()?))
        } else {
            let e = self.expression()?;
            self.consume_stmt_end();
            Some(Box::new(Stmt::Expression(e)))
        };
        if init.is_none() {
            self.expect(TokenKind::Semicolon, "';'")?;
        }
        let cond = if self.check(&TokenKind::Semicolon) { None } else { Some(self.expression()?) };
        self.expect(TokenKind::Semicolon, "';'")?;
        let post = if self.check(&TokenKind::LBrace) {
            None
        } else {
            Some(Box::new(Stmt::Expression(self.expression()?)))
        };
        let body = self.block()?;
        Ok(Stmt::ForC { init, cond, post, body })
    }

    fn return_stmt(&mut self) -> PResult<Stmt> {
        let line = self.previous().line;
        let value = if self.check(&TokenKind::Semicolon) || self.check(&TokenKind::RBrace) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume_stmt_end();
        Ok(Stmt::Return(value, line))
    }

    fn param_list(&mut self) -> PResult<(Vec<Param>, Option<String>)> {
        self.expect(TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        let mut variadic = None;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.matches(&TokenKind::Ellipsis) {
                    variadic = Some(self.expect_identifier("variadic parameter name")?);
                    break;
                }
                let name = self.expect_identifier("parameter name")?;
                let default = if self.matches(&TokenKind::Eq) { Some(self.expression()?) } else { None };
                params.push(Param { name, default });
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok((params, variadic))
    }

    fn function_rest(&mut self, named: bool) -> PResult<FunctionExpr> {
        let line = self.previous().line;
        let name = if named { Some(self.expect_identifier("function name")?) } else { None };
        let (params, variadic) = self.param_list()?;
        let body = self.block()?;
        Ok(FunctionExpr { name, params, variadic, body, line })
    }

    fn class_decl(&mut self) -> PResult<Stmt> {
        let line = self.previous().line;
        let name = self.expect_identifier("class name")?;
        let superclass = if self.matches_kw("extends") {
            Some(self.expect_identifier("superclass name")?)
        } else {
            None
        };
        self.expect(TokenKind::LBrace, "'{'")?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.check_eof() {
            self.matches_kw("fun");
            methods.push(self.function_rest(true)?);
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Stmt::ClassDecl { name, superclass, methods, line })
    }

    fn try_stmt(&mut self) -> PResult<Stmt> {
        let body = self.block()?;
        let mut excepts = Vec::new();
        while self.matches_kw("except") {
            let binding = self.expect_identifier("exception binding name")?;
            let class = if self.matches(&TokenKind::Colon) {
                Some(self.expect_identifier("exception class name")?)
            } else {
                None
            };
            let except_body = self.block()?;
            excepts.push(ExceptClause { class, binding, body: except_body });
        }
        let else_branch = if self.matches_kw("else") { Some(self.block()?) } else { None };
        let ensure = if self.matches_kw("ensure") { Some(self.block()?) } else { None };
        Ok(Stmt::Try { body, excepts, else_branch, ensure })
    }

    // ---- expressions ----

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.ternary()?;
        if self.matches(&TokenKind::Eq) {
            let line = self.previous().line;
            let value = self.assignment()?;
            let target = match expr {
                Expr::Variable(name, _) => Lvalue::Variable(name),
                Expr::Field { target, name, .. } => Lvalue::Field { target, name },
                Expr::Subscript { target, index, .. } => Lvalue::Subscript { target, index },
                _ => return Err(self.error("invalid assignment target")),
            };
            return Ok(Expr::Assign { target, value: Box::new(value), line });
        }
        Ok(expr)
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let cond = self.or_expr()?;
        if self.matches(&TokenKind::Question) {
            let line = self.previous().line;
            let then_expr = self.expression()?;
            self.expect(TokenKind::Colon, "':'")?;
            let else_expr = self.ternary()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                line,
            });
        }
        Ok(cond)
    }

    fn or_expr(&mut self) -> PResult<Expr> {
        let mut left = self.and_expr()?;
        while self.matches(&TokenKind::OrOr) || self.matches_kw("or") {
            let line = self.previous().line;
            let right = self.and_expr()?;
            left = Expr::Binary { op: BinaryOp::Or, left: Box::new(left), right: Box::new(right), line };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> PResult<Expr> {
        let mut left = self.equality()?;
        while self.matches(&TokenKind::AndAnd) || self.matches_kw("and") {
            let line = self.previous().line;
            let right = self.equality()?;
            left = Expr::Binary { op: BinaryOp::And, left: Box::new(left), right: Box::new(right), line };
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = if self.matches(&TokenKind::EqEq) {
                BinaryOp::Eq
            } else if self.matches(&TokenKind::BangEq) {
                BinaryOp::NotEq
            } else {
                break;
            };
            let line = self.previous().line;
            let right = self.comparison()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), line };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let op = if self.matches(&TokenKind::Lt) {
                BinaryOp::Lt
            } else if self.matches(&TokenKind::LtEq) {
                BinaryOp::Le
            } else if self.matches(&TokenKind::Gt) {
                BinaryOp::Gt
            } else if self.matches(&TokenKind::GtEq) {
                BinaryOp::Ge
            } else {
                break;
            };
            let line = self.previous().line;
            let right = self.additive()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), line };
        }
        Ok(left)
    }

    fn additive(&mut self) -> PResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let op = if self.matches(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.matches(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let line = self.previous().line;
            let right = self.multiplicative()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), line };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.matches(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.matches(&TokenKind::Slash) {
                BinaryOp::Div
            } else if self.matches(&TokenKind::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let line = self.previous().line;
            let right = self.unary()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), line };
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.matches(&TokenKind::Minus) {
            let line = self.previous().line;
            let operand = self.unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand), line });
        }
        if self.matches(&TokenKind::Bang) || self.matches_kw("not") {
            let line = self.previous().line;
            let operand = self.unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand), line });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(&TokenKind::LParen) {
                let line = self.previous().line;
                let args = self.argument_list()?;
                expr = match expr {
                    Expr::Field { target, name, .. } => {
                        Expr::Invoke { receiver: target, method: name, args, line }
                    }
                    other => Expr::Call { callee: Box::new(other), args, line },
                };
            } else if self.matches(&TokenKind::Dot) {
                let line = self.previous().line;
                let name = self.expect_identifier("field or method name")?;
                expr = Expr::Field { target: Box::new(expr), name, line };
            } else if self.matches(&TokenKind::LBracket) {
                let line = self.previous().line;
                let index = self.expression()?;
                self.expect(TokenKind::RBracket, "']'")?;
                expr = Expr::Subscript { target: Box::new(expr), index: Box::new(index), line };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn argument_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let line = self.peek().line;
        if self.matches_kw("null") {
            return Ok(Expr::Literal(Literal::Null, line));
        }
        if self.matches_kw("true") {
            return Ok(Expr::Literal(Literal::Bool(true), line));
        }
        if self.matches_kw("false") {
            return Ok(Expr::Literal(Literal::Bool(false), line));
        }
        if self.matches_kw("this") {
            return Ok(Expr::This(line));
        }
        if self.matches_kw("super") {
            self.expect(TokenKind::Dot, "'.' after 'super'")?;
            let method = self.expect_identifier("method name after 'super.'")?;
            return Ok(Expr::Super { method, line });
        }
        if self.matches_kw("fun") {
            return Ok(Expr::Function(Box::new(self.function_rest(false)?)));
        }
        if let TokenKind::Number(n) = self.peek().kind {
            self.advance();
            return Ok(Expr::Literal(Literal::Number(n), line));
        }
        if let TokenKind::String(_) = self.peek().kind.clone() {
            if let TokenKind::String(s) = self.advance().kind.clone() {
                return Ok(Expr::Literal(Literal::String(s), line));
            }
            unreachable!()
        }
        if let TokenKind::Identifier(_) = self.peek().kind.clone() {
            if let TokenKind::Identifier(name) = self.advance().kind.clone() {
                return Ok(Expr::Variable(name, line));
            }
            unreachable!()
        }
        if self.matches(&TokenKind::LParen) {
            let expr = self.expression()?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(expr);
        }
        if self.matches(&TokenKind::LBracket) {
            return self.list_or_tuple(line);
        }
        if self.matches(&TokenKind::LBrace) {
            return self.table_literal(line);
        }
        Err(self.error(format!("unexpected token {:?}", self.peek().kind)))
    }

    fn list_or_tuple(&mut self, line: usize) -> PResult<Expr> {
        let mut elements = Vec::new();
        let mut trailing_comma_only_one = false;
        if !self.check(&TokenKind::RBracket) {
            loop {
                elements.push(self.expression()?);
                if self.matches(&TokenKind::Comma) {
                    if self.check(&TokenKind::RBracket) {
                        trailing_comma_only_one = elements.len() == 1;
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        self.expect(TokenKind::RBracket, "']'")?;
        let _ = trailing_comma_only_one;
        Ok(Expr::ListLiteral(elements, line))
    }

    fn table_literal(&mut self, line: usize) -> PResult<Expr> {
        let mut pairs = Vec::new();
        if !self.check(&TokenKind::RBrace) {
            loop {
                let key = self.expression()?;
                self.expect(TokenKind::Colon, "':' in table literal")?;
                let value = self.expression()?;
                pairs.push((key, value));
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
                if self.check(&TokenKind::RBrace) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBrace, "'}'")?;
        Ok(Expr::TableLiteral(pairs, line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Vec<Stmt> {
        let tokens = tokenize(src).unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    #[test]
    fn parses_var_decl_with_initializer() {
        let stmts = parse("var a = 1 + 2;");
        assert_eq!(stmts.len(), 1);
        assert!(matches!(stmts[0], Stmt::VarDecl { .. }));
    }

    #[test]
    fn parses_function_with_defaults_and_variadic() {
        let stmts = parse("fun g(a, b=10, ...rest) { return a; }");
        match &stmts[0] {
            Stmt::FunctionDecl(f) => {
                assert_eq!(f.params.len(), 2);
                assert_eq!(f.variadic.as_deref(), Some("rest"));
            }
            _ => panic!("expected function decl"),
        }
    }

    #[test]
    fn parses_class_with_superclass() {
        let stmts = parse("class Dog extends Animal { fun speak() { return 1; } }");
        match &stmts[0] {
            Stmt::ClassDecl { superclass, methods, .. } => {
                assert_eq!(superclass.as_deref(), Some("Animal"));
                assert_eq!(methods.len(), 1);
            }
            _ => panic!("expected class decl"),
        }
    }

    #[test]
    fn parses_try_except_else_ensure() {
        let stmts = parse(
            "try { raise 1; } except e: Exception { } else { } ensure { }",
        );
        assert!(matches!(stmts[0], Stmt::Try { .. }));
    }

    #[test]
    fn reports_error_on_invalid_assignment_target() {
        let tokens = tokenize("1 = 2;").unwrap();
        assert!(Parser::new(tokens).parse_program().is_err());
    }
}
