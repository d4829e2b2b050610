//! Expression-evaluating calculator service.
//!
//! Recursive-descent parser over `+ - * /`, parentheses, unary minus and
//! decimal literals, with standard operator precedence. Every arithmetic
//! step is delegated to the math services resolved from the provider during
//! initialization; the calculator itself never computes.

use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, bail, ensure, Context};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::info;

use armature_core::service::{
    InterfaceDescriptor, InterfaceHandle, Service, ServiceCreateInfo, ServiceFactory,
    ServiceInitResult, ServiceInstanceInfo, ServiceShutdownResult,
};
use armature_core::AnyResult;

use crate::math::{AddService, DivideService, MultiplyService, SubtractService};

#[async_trait]
pub trait CalculatorService: Send + Sync {
    async fn evaluate_async(&self, expression: &str) -> AnyResult<f64>;
}

struct MathDeps {
    add: Arc<dyn AddService>,
    subtract: Arc<dyn SubtractService>,
    multiply: Arc<dyn MultiplyService>,
    divide: Arc<dyn DivideService>,
}

struct Cursor {
    chars: Vec<char>,
    position: usize,
}

impl Cursor {
    fn new(expression: &str) -> Self {
        Self {
            chars: expression.chars().collect(),
            position: 0,
        }
    }

    fn skip_whitespace(&mut self) {
        while self
            .chars
            .get(self.position)
            .is_some_and(|c| c.is_whitespace())
        {
            self.position += 1;
        }
    }

    /// Next non-whitespace character without consuming it.
    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.get(self.position).copied()
    }

    fn consume(&mut self) -> Option<char> {
        self.skip_whitespace();
        let c = self.chars.get(self.position).copied();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn at_end(&mut self) -> bool {
        self.peek().is_none()
    }
}

struct ExpressionCalculatorService {
    deps: OnceLock<MathDeps>,
}

impl ExpressionCalculatorService {
    fn new() -> Self {
        Self {
            deps: OnceLock::new(),
        }
    }

    fn deps(&self) -> AnyResult<&MathDeps> {
        self.deps
            .get()
            .ok_or_else(|| anyhow!("calculator service is not initialized"))
    }

    // expression := term (('+' | '-') term)*
    fn parse_expression<'a>(&'a self, cursor: &'a mut Cursor) -> BoxFuture<'a, AnyResult<f64>> {
        Box::pin(async move {
            let deps = self.deps()?;
            let mut value = self.parse_term(cursor).await?;
            loop {
                match cursor.peek() {
                    Some('+') => {
                        cursor.consume();
                        let rhs = self.parse_term(cursor).await?;
                        value = deps.add.add_async(value, rhs).await;
                    }
                    Some('-') => {
                        cursor.consume();
                        let rhs = self.parse_term(cursor).await?;
                        value = deps.subtract.subtract_async(value, rhs).await;
                    }
                    _ => break,
                }
            }
            Ok(value)
        })
    }

    // term := primary (('*' | '/') primary)*
    fn parse_term<'a>(&'a self, cursor: &'a mut Cursor) -> BoxFuture<'a, AnyResult<f64>> {
        Box::pin(async move {
            let deps = self.deps()?;
            let mut value = self.parse_primary(cursor).await?;
            loop {
                match cursor.peek() {
                    Some('*') => {
                        cursor.consume();
                        let rhs = self.parse_primary(cursor).await?;
                        value = deps.multiply.multiply_async(value, rhs).await;
                    }
                    Some('/') => {
                        cursor.consume();
                        let rhs = self.parse_primary(cursor).await?;
                        value = deps.divide.divide_async(value, rhs).await?;
                    }
                    _ => break,
                }
            }
            Ok(value)
        })
    }

    // primary := number | '(' expression ')'
    fn parse_primary<'a>(&'a self, cursor: &'a mut Cursor) -> BoxFuture<'a, AnyResult<f64>> {
        Box::pin(async move {
            match cursor.peek() {
                Some('(') => {
                    cursor.consume();
                    let value = self.parse_expression(cursor).await?;
                    ensure!(cursor.consume() == Some(')'), "missing closing parenthesis");
                    Ok(value)
                }
                Some(c) if c.is_ascii_digit() || c == '.' || c == '-' => {
                    self.parse_number(cursor)
                }
                Some(c) => bail!("unexpected character '{c}' at position {}", cursor.position),
                None => bail!("unexpected end of expression"),
            }
        })
    }

    fn parse_number(&self, cursor: &mut Cursor) -> AnyResult<f64> {
        cursor.skip_whitespace();
        let mut literal = String::new();
        if cursor.peek() == Some('-') {
            cursor.consume();
            literal.push('-');
        }
        let mut seen_decimal_point = false;
        while let Some(c) = cursor.chars.get(cursor.position).copied() {
            if c.is_ascii_digit() || (c == '.' && !seen_decimal_point) {
                seen_decimal_point |= c == '.';
                literal.push(c);
                cursor.position += 1;
            } else {
                break;
            }
        }
        ensure!(
            !(literal.is_empty() || literal == "-" || literal == "." || literal == "-."),
            "invalid number at position {}",
            cursor.position
        );
        literal
            .parse::<f64>()
            .with_context(|| format!("invalid number literal '{literal}'"))
    }
}

#[async_trait]
impl Service for ExpressionCalculatorService {
    async fn init_async(&self, create_info: &ServiceCreateInfo) -> AnyResult<ServiceInitResult> {
        let provider = create_info.provider();
        let deps = MathDeps {
            add: provider.get_service::<dyn AddService>()?,
            subtract: provider.get_service::<dyn SubtractService>()?,
            multiply: provider.get_service::<dyn MultiplyService>()?,
            divide: provider.get_service::<dyn DivideService>()?,
        };
        if self.deps.set(deps).is_err() {
            return Ok(ServiceInitResult::Failure(
                "calculator initialized twice".into(),
            ));
        }
        info!("calculator service ready");
        Ok(ServiceInitResult::Success)
    }

    async fn shutdown_async(&self) -> AnyResult<ServiceShutdownResult> {
        info!("calculator service stopped");
        Ok(ServiceShutdownResult::Success)
    }
}

#[async_trait]
impl CalculatorService for ExpressionCalculatorService {
    async fn evaluate_async(&self, expression: &str) -> AnyResult<f64> {
        let mut cursor = Cursor::new(expression);
        let value = self.parse_expression(&mut cursor).await?;
        ensure!(
            cursor.at_end(),
            "trailing input at position {}",
            cursor.position
        );
        Ok(value)
    }
}

#[derive(Default)]
pub struct CalculatorServiceFactory;

impl ServiceFactory for CalculatorServiceFactory {
    fn supported_interfaces(&self) -> Vec<InterfaceDescriptor> {
        vec![InterfaceDescriptor::of::<dyn CalculatorService>()]
    }

    fn create(
        &self,
        interface: InterfaceDescriptor,
        _create_info: &ServiceCreateInfo,
    ) -> AnyResult<ServiceInstanceInfo> {
        ensure!(
            interface == InterfaceDescriptor::of::<dyn CalculatorService>(),
            "unsupported interface '{}'",
            interface.name
        );
        let service = Arc::new(ExpressionCalculatorService::new());
        Ok(ServiceInstanceInfo::new(
            service.clone(),
            vec![InterfaceHandle::new::<dyn CalculatorService>(service)],
        ))
    }
}
