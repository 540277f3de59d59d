//! End-to-end compilation benchmarks.
//!
//! Measures the pipeline stages separately on a token contract:
//! 1. Parse + analysis
//! 2. Full compile without the optimizer
//! 3. Full compile with the optimizer
//! 4. IR optimization alone, on a synthetic arithmetic tree

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use viper::{check_code, compile_code, CompileOptions};

const TOKEN: &str = r#"
from vyper.interfaces import ERC20

event Transfer:
    sender: indexed(address)
    receiver: indexed(address)
    value: uint256

event Approval:
    owner: indexed(address)
    spender: indexed(address)
    value: uint256

balanceOf: public(HashMap[address, uint256])
allowance: public(HashMap[address, HashMap[address, uint256]])
totalSupply: public(uint256)
minter: address

@external
def __init__(supply: uint256):
    self.balanceOf[msg.sender] = supply
    self.totalSupply = supply
    self.minter = msg.sender

@internal
def _move(sender: address, receiver: address, amount: uint256):
    self.balanceOf[sender] -= amount
    self.balanceOf[receiver] += amount
    log Transfer(sender, receiver, amount)

@external
def transfer(to: address, amount: uint256) -> bool:
    self._move(msg.sender, to, amount)
    return True

@external
def transferFrom(owner: address, to: address, amount: uint256) -> bool:
    self.allowance[owner][msg.sender] -= amount
    self._move(owner, to, amount)
    return True

@external
def approve(spender: address, amount: uint256) -> bool:
    self.allowance[msg.sender][spender] = amount
    log Approval(msg.sender, spender, amount)
    return True

@external
def mint(to: address, amount: uint256):
    assert msg.sender == self.minter, "only minter"
    self.totalSupply += amount
    self.balanceOf[to] += amount
    log Transfer(empty(address), to, amount)
"#;

/// `(add (mul 1 2) (add (mul 3 4) ...))` with `n` products.
fn synthetic_ir(n: usize) -> String {
    let mut text = String::from("0");
    for i in 0..n {
        text = format!("(add (mul {} {}) {})", i, i + 1, text);
    }
    text
}

fn bench_end_to_end(c: &mut Criterion) {
    let options = CompileOptions::default();
    let unoptimized = CompileOptions::unoptimized();

    c.bench_function("analyze_token", |b| {
        b.iter(|| check_code(black_box(TOKEN), &options).map(|a| a.types.len()))
    });

    c.bench_function("compile_token_unoptimized", |b| {
        b.iter(|| compile_code(black_box(TOKEN), &unoptimized).map(|o| o.ir.gas))
    });

    c.bench_function("compile_token", |b| {
        b.iter(|| compile_code(black_box(TOKEN), &options).map(|o| o.ir.gas))
    });

    let tree = viper::ir::parse_ir(&synthetic_ir(200)).ok();
    c.bench_function("optimize_arith_200", |b| {
        b.iter(|| tree.as_ref().map(|t| viper::ir::optimize(black_box(t)).map(|o| o.gas)))
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_end_to_end
}
criterion_main!(benches);
