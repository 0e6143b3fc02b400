//! A minimal IOU token used by the demo binary and the test-suite.

use super::native::{CallContext, NativeContract};
use crate::abi::{ContractInterface, EventDescriptor, EventParam, FunctionDescriptor, ParamKind, Token};
use crate::error::ChainError;

pub const IOU_TOKEN: &str = "IouToken";

#[derive(Debug, Default, Clone, Copy)]
pub struct IouToken;

impl IouToken {
    pub fn transfer_event() -> EventDescriptor {
        EventDescriptor::new(
            "Transfer",
            vec![
                EventParam::indexed("from", ParamKind::Address),
                EventParam::indexed("to", ParamKind::Address),
                EventParam::new("amount", ParamKind::Uint),
            ],
        )
    }

    fn balance_slot(owner: &Token) -> [u8; 32] {
        CallContext::slot("balances", std::slice::from_ref(owner))
    }
}

impl NativeContract for IouToken {
    fn interface(&self) -> ContractInterface {
        ContractInterface::new()
            .with_constructor(vec![ParamKind::Uint])
            .with_function(FunctionDescriptor::new("totalSupply", vec![]))
            .with_function(FunctionDescriptor::new("balanceOf", vec![ParamKind::Address]))
            .with_function(FunctionDescriptor::new(
                "transfer",
                vec![ParamKind::Address, ParamKind::Uint],
            ))
            .with_event(Self::transfer_event())
    }

    /// Mints the whole supply to the deployer, announced as a transfer from
    /// the zero address.
    fn construct(&self, ctx: &mut CallContext<'_>, args: &[Token]) -> Result<(), ChainError> {
        let supply = args.first().and_then(Token::as_uint).unwrap_or_default();
        let owner = Token::Address(ctx.sender);
        ctx.store_uint(CallContext::slot("totalSupply", &[]), supply)?;
        ctx.store_uint(Self::balance_slot(&owner), supply)?;
        ctx.emit(&Self::transfer_event(), &[Token::Address([0u8; 20]), owner, Token::Uint(supply)])
    }

    fn call(&self, ctx: &mut CallContext<'_>, function: &str, args: &[Token]) -> Result<Vec<Token>, ChainError> {
        match function {
            "totalSupply" => {
                let supply = ctx.load_uint(&CallContext::slot("totalSupply", &[]))?;
                Ok(vec![Token::Uint(supply)])
            }
            "balanceOf" => {
                let balance = ctx.load_uint(&Self::balance_slot(&args[0]))?;
                Ok(vec![Token::Uint(balance)])
            }
            "transfer" => {
                let from = Token::Address(ctx.sender);
                let to = args[0].clone();
                let amount = args[1].as_uint().unwrap_or_default();

                let from_balance = ctx.load_uint(&Self::balance_slot(&from))?;
                let Some(remaining) = from_balance.checked_sub(amount) else {
                    return ctx.revert(format!("balance {} below transfer amount {}", from_balance, amount));
                };
                ctx.store_uint(Self::balance_slot(&from), remaining)?;
                let to_balance = ctx.load_uint(&Self::balance_slot(&to))?;
                ctx.store_uint(Self::balance_slot(&to), to_balance + amount)?;

                ctx.emit(&Self::transfer_event(), &[from, to, Token::Uint(amount)])?;
                Ok(vec![Token::Bool(true)])
            }
            other => ctx.revert(format!("unknown function {}", other)),
        }
    }
}
