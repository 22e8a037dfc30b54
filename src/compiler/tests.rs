//! Whole-pipeline tests: registry in, assembler text out.

use super::ir::{Instruction, Op};
use super::obj::{Object, ObjectId, Registry, StorageClass, Width};
use super::x86::Mode;
use super::{layout, opt, x86};

fn static_prime(reg: &mut Registry, label: &str, width: Width) -> ObjectId {
    let mut obj = Object::prime(label, width, false);
    obj.set_sclass(StorageClass::Private).unwrap();
    reg.add(obj).unwrap()
}

fn temp(reg: &mut Registry, label: &str) -> ObjectId {
    let mut obj = Object::prime(label, Width::Byte4, false);
    obj.set_sclass(StorageClass::Temp).unwrap();
    reg.add(obj).unwrap()
}

fn routine_shell(
    reg: &mut Registry,
    label: &str,
    params: &[(&str, Width)],
    autos: &[(&str, Width)],
) -> ObjectId {
    let formals = reg.alloc(Object::struct_def(&format!("{}_params", label)));
    for (name, width) in params {
        let mut p = Object::prime(name, *width, false);
        p.set_sclass(StorageClass::Param).unwrap();
        let p = reg.alloc(p);
        reg.get_mut(formals)
            .as_struct_def_mut()
            .unwrap()
            .add_member(p);
    }
    let auto_def = reg.alloc(Object::struct_def(&format!("{}_autos", label)));
    for (name, width) in autos {
        let mut a = Object::prime(name, *width, false);
        a.set_sclass(StorageClass::Auto).unwrap();
        let a = reg.alloc(a);
        reg.get_mut(auto_def)
            .as_struct_def_mut()
            .unwrap()
            .add_member(a);
    }
    let mut obj = Object::routine(label, formals, auto_def);
    obj.set_sclass(StorageClass::Public).unwrap();
    reg.add(obj).unwrap()
}

fn set_body(reg: &mut Registry, rid: ObjectId, body: Vec<Instruction>) {
    reg.get_mut(rid)
        .as_routine_mut()
        .unwrap()
        .set_body(body)
        .unwrap();
}

fn param(reg: &Registry, rid: ObjectId, i: usize) -> ObjectId {
    let formals = reg.get(rid).as_routine().unwrap().formals();
    reg.get(formals).as_struct_def().unwrap().members()[i]
}

fn auto(reg: &Registry, rid: ObjectId, i: usize) -> ObjectId {
    let autos = reg.get(rid).as_routine().unwrap().autos();
    reg.get(autos).as_struct_def().unwrap().members()[i]
}

fn generate(reg: &mut Registry, mode: Mode) -> String {
    opt::eliminate(reg).unwrap();
    layout::resolve(reg, mode).unwrap();
    let mut out = vec![];
    x86::x86(&mut out, reg, mode).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_parameters_address_above_the_frame_base() {
    // in 64-bit mode parameter 0 is BP+16 and parameter 1 is BP+24
    let mut reg = Registry::new();
    let r = static_prime(&mut reg, "r", Width::Byte4);
    let rid = routine_shell(
        &mut reg,
        "sum",
        &[("p0", Width::Byte4), ("p1", Width::Byte4)],
        &[],
    );
    let p0 = param(&reg, rid, 0);
    let p1 = param(&reg, rid, 1);
    let t = temp(&mut reg, "_t0");
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::binary(Op::Add, t, p0, p1),
            Instruction::unary(Op::Ass, r, t),
            Instruction::effect(Op::Rtrn, Some(r)),
        ],
    );

    let text = generate(&mut reg, Mode::Long);
    assert!(text.contains("mov eax, DWORD [rbp+16]"), "{}", text);
    assert!(text.contains("add eax, DWORD [rbp+24]"), "{}", text);
    // the return reclaims its own two parameter slots
    assert!(text.contains("ret 16"), "{}", text);
}

#[test]
fn test_protected_mode_uses_narrow_registers_and_slots() {
    let mut reg = Registry::new();
    let r = static_prime(&mut reg, "r", Width::Byte4);
    let rid = routine_shell(&mut reg, "sum", &[("p0", Width::Byte4)], &[]);
    let p0 = param(&reg, rid, 0);
    let t = temp(&mut reg, "_t0");
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::binary(Op::Add, t, p0, p0),
            Instruction::unary(Op::Ass, r, t),
            Instruction::effect(Op::Rtrn, Some(r)),
        ],
    );

    let text = generate(&mut reg, Mode::Protected);
    // one pointer-width slot above return address and saved frame base
    assert!(text.contains("mov eax, DWORD [ebp+8]"), "{}", text);
    assert!(text.contains("ret 4"), "{}", text);
}

#[test]
fn test_automatics_land_below_the_frame_base() {
    // one 4-byte then one 8-byte automatic pads to offset 8: 16 frame bytes
    let mut reg = Registry::new();
    let r = static_prime(&mut reg, "r", Width::Byte8);
    let rid = routine_shell(
        &mut reg,
        "f",
        &[],
        &[("v0", Width::Byte4), ("v1", Width::Byte8)],
    );
    let v0 = auto(&reg, rid, 0);
    let v1 = auto(&reg, rid, 1);
    let c1 = reg.alloc(Object::constant(Width::Byte4, 1));
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::unary(Op::Ass, v0, c1),
            Instruction::unary(Op::Ass, v1, c1),
            Instruction::unary(Op::Ass, r, v1),
            Instruction::effect(Op::Rtrn, None),
        ],
    );

    let text = generate(&mut reg, Mode::Long);
    assert!(text.contains("enter 16, 0"), "{}", text);
    assert!(text.contains("mov DWORD [rbp-16], eax"), "{}", text);
    assert!(text.contains("mov QWORD [rbp-8], rax"), "{}", text);
}

#[test]
fn test_member_store_goes_through_the_base_register() {
    let mut reg = Registry::new();
    let x = reg.alloc({
        let mut m = Object::prime("x", Width::Byte4, false);
        m.set_sclass(StorageClass::Member).unwrap();
        m
    });
    let y = reg.alloc({
        let mut m = Object::prime("y", Width::Byte4, false);
        m.set_sclass(StorageClass::Member).unwrap();
        m
    });
    let mut def = Object::struct_def("point");
    def.set_sclass(StorageClass::Private).unwrap();
    let def = reg.add(def).unwrap();
    reg.get_mut(def).as_struct_def_mut().unwrap().add_member(x);
    reg.get_mut(def).as_struct_def_mut().unwrap().add_member(y);

    let mut inst = Object::struct_inst("origin", def);
    inst.set_sclass(StorageClass::Private).unwrap();
    let origin = reg.add(inst).unwrap();

    let five = reg.alloc(Object::constant(Width::Byte4, 5));
    let t = temp(&mut reg, "_t0");
    let rid = routine_shell(&mut reg, "init", &[], &[]);
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::binary(Op::Memb, t, origin, y),
            Instruction::unary(Op::Ass, t, five),
            Instruction::effect(Op::Rtrn, None),
        ],
    );

    let text = generate(&mut reg, Mode::Long);
    // the member's constant offset is added to the resolved base
    assert!(text.contains("lea rsi, [origin+4]"), "{}", text);
    assert!(text.contains("mov DWORD [rsi], eax"), "{}", text);
    // the layout record and its size assertion
    assert!(text.contains("struc point"), "{}", text);
    assert!(text.contains(".x: resb 4"), "{}", text);
    assert!(text.contains("%if (point_size != 8)"), "{}", text);
    // an instance reserves the aggregate size
    assert!(text.contains("origin: resb 8"), "{}", text);
}

#[test]
fn test_calls_push_arguments_and_collect_the_accumulator() {
    let mut reg = Registry::new();
    let mut ext = Object::prime("printi", Width::Word, false);
    ext.set_sclass(StorageClass::Extern).unwrap();
    let printi = reg.add(ext).unwrap();
    let a = static_prime(&mut reg, "a", Width::Byte4);
    let r = static_prime(&mut reg, "r", Width::Byte4);
    let rid = routine_shell(&mut reg, "main", &[], &[]);
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::effect(Op::Parm, Some(a)),
            Instruction::new(Op::Call, Some(r), Some(printi), None),
            Instruction::effect(Op::Rtrn, Some(r)),
        ],
    );

    let text = generate(&mut reg, Mode::Long);
    assert!(text.contains("extern printi"), "{}", text);
    assert!(text.contains("global main"), "{}", text);
    assert!(text.contains("push rax"), "{}", text);
    assert!(text.contains("call printi"), "{}", text);
    // the return value is stored from the accumulator
    assert!(text.contains("mov DWORD [r], eax"), "{}", text);
}

#[test]
fn test_branches_reference_label_text() {
    let mut reg = Registry::new();
    let end = reg.add(Object::code_label(".end")).unwrap();
    let a = static_prime(&mut reg, "a", Width::Byte4);
    let b = static_prime(&mut reg, "b", Width::Byte4);
    let r = static_prime(&mut reg, "r", Width::Byte4);
    let t = temp(&mut reg, "_t0");
    let rid = routine_shell(&mut reg, "main", &[], &[]);
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::binary(Op::Sub, t, a, b),
            Instruction::new(Op::Jz, None, Some(end), Some(t)),
            Instruction::unary(Op::Ass, r, b),
            Instruction::effect(Op::Lbl, Some(end)),
            Instruction::effect(Op::Rtrn, None),
        ],
    );

    let text = generate(&mut reg, Mode::Long);
    assert!(text.contains("test eax, eax"), "{}", text);
    assert!(text.contains("jz .end"), "{}", text);
    assert!(text.contains(".end:"), "{}", text);
}

#[test]
fn test_static_data_emission() {
    let mut reg = Registry::new();
    let mut counter = Object::prime("counter", Width::Byte4, false);
    counter.set_sclass(StorageClass::Public).unwrap();
    counter.as_prime_mut().unwrap().set_value(7);
    reg.add(counter).unwrap();

    let elem = reg.alloc(Object::prime("", Width::Byte, false));
    let mut msg = Object::array("msg", Some(elem), 3);
    msg.set_sclass(StorageClass::Private).unwrap();
    msg.as_array_mut().unwrap().set_literal(b"ok\0".to_vec());
    reg.add(msg).unwrap();

    let elem2 = reg.alloc(Object::prime("", Width::Byte4, false));
    let mut buf = Object::array("buf", Some(elem2), 10);
    buf.set_sclass(StorageClass::Private).unwrap();
    reg.add(buf).unwrap();

    let rid = routine_shell(&mut reg, "main", &[], &[]);
    set_body(&mut reg, rid, vec![Instruction::effect(Op::Rtrn, None)]);

    let text = generate(&mut reg, Mode::Long);
    assert!(text.contains("section .data"), "{}", text);
    assert!(text.contains("global counter"), "{}", text);
    assert!(text.contains("counter: dd 7"), "{}", text);
    assert!(text.contains("msg: db 'o','k',0x00"), "{}", text);
    assert!(text.contains("section .bss"), "{}", text);
    assert!(text.contains("buf: resb 40"), "{}", text);
    assert!(text.contains("section .text"), "{}", text);
}

#[test]
fn test_emission_is_deterministic() {
    fn build() -> String {
        let mut reg = Registry::new();
        let a = static_prime(&mut reg, "a", Width::Byte4);
        let b = static_prime(&mut reg, "b", Width::Byte4);
        let r = static_prime(&mut reg, "r", Width::Byte4);
        let t = temp(&mut reg, "_t0");
        let rid = routine_shell(&mut reg, "main", &[], &[]);
        set_body(
            &mut reg,
            rid,
            vec![
                Instruction::binary(Op::Add, t, a, b),
                Instruction::unary(Op::Ass, r, t),
                Instruction::effect(Op::Rtrn, None),
            ],
        );
        generate(&mut reg, Mode::Long)
    }

    assert_eq!(build(), build());
}

#[test]
fn test_spilled_temporary_comes_back_from_its_slot() {
    // t1 is produced, held across the production of t2, then consumed:
    // it cannot stay in the accumulator and must travel through a slot
    let mut reg = Registry::new();
    let a = static_prime(&mut reg, "a", Width::Byte4);
    let b = static_prime(&mut reg, "b", Width::Byte4);
    let r = static_prime(&mut reg, "r", Width::Byte4);
    let t1 = temp(&mut reg, "_t1");
    let t2 = temp(&mut reg, "_t2");
    let t3 = temp(&mut reg, "_t3");
    let rid = routine_shell(&mut reg, "main", &[], &[]);
    set_body(
        &mut reg,
        rid,
        vec![
            Instruction::binary(Op::Sub, t1, a, b),
            Instruction::binary(Op::Add, t2, a, b),
            Instruction::binary(Op::Mul, t3, t1, t2),
            Instruction::unary(Op::Ass, r, t3),
            Instruction::effect(Op::Rtrn, None),
        ],
    );

    let text = generate(&mut reg, Mode::Long);
    // two temporaries overlap, so the frame carries spill space
    assert!(text.contains("enter 16, 0"), "{}", text);
    assert!(text.contains("mov DWORD [rbp-8], eax"), "{}", text);
}
