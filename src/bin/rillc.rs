extern crate log;
extern crate simplelog;

use std::fs::File;
use std::time::Instant;

use rand::prelude::*;

use rill_backend::cli::*;
use rill_backend::compiler::ir::{Instruction, Op};
use rill_backend::compiler::obj::{Object, ObjectId, Registry, StorageClass, Width};
use rill_backend::compiler::x86::{self, Mode};
use rill_backend::compiler::{layout, opt};
use rill_backend::result::Result;

/**
A driver for the backend. The front end is a separate program, so the unit
it compiles comes from a built-in generator of random, valid IR: enough to
exercise partitioning, dead code elimination, layout, and code generation
end to end, and to hand NASM something real to chew on. The same seed
always produces the same unit.
*/

fn main() -> std::result::Result<(), i32> {
    let config = configure_cli().get_matches();

    if let Some(level) = get_log_level(&config) {
        configure_logging(level).expect("Failed to configure logger.")
    }

    let mode = match config.value_of("platform") {
        Some("x86-64") => Mode::Long,
        Some("x86-32") => Mode::Protected,
        _ => {
            println!("Expected a platform of x86-64 or x86-32");
            return Err(ERR_BAD_ARGS);
        }
    };

    let seed = config
        .value_of("seed")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    let routines = config
        .value_of("routines")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(2);
    let output = config
        .value_of("output")
        .expect("Expected an output file to write assembly to");

    let build_time = Instant::now();
    let mut registry = Registry::new();
    if let Err(e) = build_unit(&mut registry, seed, routines) {
        println!("Failed to build the test unit: {}", e);
        return Err(ERR_BUILD_ERROR);
    }
    eprintln!("Build: {}", build_time.elapsed().as_secs_f32());

    let opt_time = Instant::now();
    if let Err(e) = opt::eliminate(&mut registry) {
        println!("Dead code elimination failed: {}", e);
        return Err(ERR_GEN_ERROR);
    }
    eprintln!("Dead code: {}", opt_time.elapsed().as_secs_f32());

    let layout_time = Instant::now();
    if let Err(e) = layout::resolve(&mut registry, mode) {
        println!("Layout resolution failed: {}", e);
        return Err(ERR_GEN_ERROR);
    }
    eprintln!("Layout: {}", layout_time.elapsed().as_secs_f32());

    let gen_time = Instant::now();
    let mut file = match File::create(output) {
        Ok(f) => f,
        Err(e) => {
            println!("Could not create {}: {}", output, e);
            return Err(ERR_IO_ERROR);
        }
    };
    if let Err(e) = x86::x86(&mut file, &registry, mode) {
        println!("Code generation failed: {}", e);
        // a partial file is useless to the assembler
        let _ = std::fs::remove_file(output);
        return Err(ERR_GEN_ERROR);
    }
    eprintln!("Codegen: {}", gen_time.elapsed().as_secs_f32());

    Ok(())
}

/// Everything the statement generator can pick operands from.
struct Scope {
    values: Vec<ObjectId>,
    temps: usize,
}

fn build_unit(reg: &mut Registry, seed: u64, routines: usize) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut statics = vec![];
    for i in 0..4 {
        let mut obj = Object::prime(&format!("g{}", i), Width::Byte4, false);
        obj.set_sclass(if i == 0 {
            StorageClass::Public
        } else {
            StorageClass::Private
        })?;
        obj.as_prime_mut()?.set_value(rng.gen_range(1..100));
        statics.push(reg.add(obj)?);
    }

    let mut scope = Scope {
        values: vec![],
        temps: 0,
    };

    for r in 0..routines {
        let name = format!("routine{}", r);
        scope.values = statics.clone();

        let formals = reg.alloc(Object::struct_def(&format!("{}_params", name)));
        for p in 0..rng.gen_range(0..3) {
            let mut param = Object::prime(&format!("p{}", p), Width::Byte4, false);
            param.set_sclass(StorageClass::Param)?;
            let param = reg.alloc(param);
            reg.get_mut(formals).as_struct_def_mut()?.add_member(param);
            scope.values.push(param);
        }

        let autos = reg.alloc(Object::struct_def(&format!("{}_autos", name)));
        let mut locals = vec![];
        for a in 0..rng.gen_range(0..3) {
            let mut auto = Object::prime(&format!("v{}", a), Width::Byte4, false);
            auto.set_sclass(StorageClass::Auto)?;
            let auto = reg.alloc(auto);
            reg.get_mut(autos).as_struct_def_mut()?.add_member(auto);
            locals.push(auto);
        }

        let mut routine = Object::routine(&name, formals, autos);
        routine.set_sclass(StorageClass::Public)?;
        let rid = reg.add(routine)?;

        let mut body = vec![];
        for statement in 0..rng.gen_range(2..6) {
            statement_into(reg, &mut rng, &mut scope, &locals, &mut body)?;
            // an early exit somewhere in the middle keeps the partitioner
            // and branch lowering honest
            if statement == 1 && rng.gen_bool(0.3) {
                branch_into(reg, &mut rng, &mut scope, r, &mut body)?;
            }
        }
        body.push(Instruction::effect(Op::Rtrn, Some(statics[0])));

        reg.get_mut(rid).as_routine_mut()?.set_body(body)?;
    }

    Ok(())
}

/// One `t = a op b; dst = t` pair, the bread and butter of a quad stream.
fn statement_into(
    reg: &mut Registry,
    rng: &mut StdRng,
    scope: &mut Scope,
    locals: &[ObjectId],
    body: &mut Vec<Instruction>,
) -> Result<()> {
    const OPS: [Op; 7] = [
        Op::Add,
        Op::Sub,
        Op::Band,
        Op::Bor,
        Op::Xor,
        Op::Mul,
        Op::Div,
    ];
    let op = OPS[rng.gen_range(0..OPS.len())];

    let a = scope.values[rng.gen_range(0..scope.values.len())];
    let b = scope.values[rng.gen_range(0..scope.values.len())];

    let t = new_temp(reg, scope)?;
    body.push(Instruction::binary(op, t, a, b));

    let dst = if !locals.is_empty() && rng.gen_bool(0.5) {
        locals[rng.gen_range(0..locals.len())]
    } else {
        scope.values[rng.gen_range(0..scope.values.len())]
    };
    body.push(Instruction::unary(Op::Ass, dst, t));
    Ok(())
}

/// A conditional hop over one assignment.
fn branch_into(
    reg: &mut Registry,
    rng: &mut StdRng,
    scope: &mut Scope,
    routine: usize,
    body: &mut Vec<Instruction>,
) -> Result<()> {
    let label = reg.add(Object::code_label(&format!(".skip{}", routine)))?;
    let a = scope.values[rng.gen_range(0..scope.values.len())];
    let b = scope.values[rng.gen_range(0..scope.values.len())];

    let t = new_temp(reg, scope)?;
    body.push(Instruction::binary(Op::Sub, t, a, b));
    body.push(Instruction::new(Op::Jz, None, Some(label), Some(t)));
    body.push(Instruction::unary(Op::Ass, a, b));
    body.push(Instruction::effect(Op::Lbl, Some(label)));
    Ok(())
}

fn new_temp(reg: &mut Registry, scope: &mut Scope) -> Result<ObjectId> {
    let mut t = Object::prime(&format!("_t{}", scope.temps), Width::Byte4, false);
    scope.temps += 1;
    t.set_sclass(StorageClass::Temp)?;
    Ok(reg.add(t)?)
}
