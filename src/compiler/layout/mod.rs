//! Computes byte sizes and member offsets for every data object in a unit.
//!
//! Widths only resolve to byte counts here, because the answer depends on
//! the processor mode. The rest of the backend never recomputes a size: it
//! reads what this pass memoized onto each object.
//!
//! Structures are laid out in declaration order. Padding is inserted
//! whenever the next member's natural alignment is not met by the running
//! offset; natural alignment derives from the member's own size, capped at
//! the strictest alignment the mode uses. Routine frames and formal
//! parameter areas are rounded up to the pointer width, and each formal
//! parameter occupies one pointer-width slot.

use log::debug;

use crate::compiler::error::{LayoutError, ObjectError};
use crate::compiler::obj::{ObjectId, ObjectKind, Registry, Width};
use crate::compiler::x86::Mode;
use crate::result::Result;

/// Resolve sizes and offsets for everything reachable from the registry.
/// Must run after the dead-code pass and before code generation.
pub fn resolve(registry: &mut Registry, mode: Mode) -> Result<()> {
    mode.validate()?;
    debug!("layout: start");

    // routines first, so their parameter areas get slot layout before the
    // generic walk could give them structure layout
    for id in registry.ids() {
        if matches!(registry.get(id).kind(), ObjectKind::Routine(_)) {
            layout_routine(registry, id, mode)?;
        }
    }

    for id in registry.ids() {
        let sizable = matches!(
            registry.get(id).kind(),
            ObjectKind::Prime(_)
                | ObjectKind::Array(_)
                | ObjectKind::StructInst(_)
                | ObjectKind::StructDef(_)
        );
        if sizable {
            size_of(registry, id, mode)?;
        }
    }

    debug!("layout: stop");
    Ok(())
}

/// What `size_of` needs to know about an object before recursing.
enum SizeRule {
    Fixed(Width),
    Repeat { child: Option<ObjectId>, count: u64 },
    SameAs(ObjectId),
    Aggregate,
    None,
}

/// The byte size of an object, computing and memoizing it on first use.
pub fn size_of(registry: &mut Registry, id: ObjectId, mode: Mode) -> Result<u64> {
    if let Some(size) = registry.get(id).size() {
        return Ok(size);
    }

    let label = registry.get(id).label().to_string();
    let rule = match registry.get(id).kind() {
        ObjectKind::Prime(p) => SizeRule::Fixed(p.width()),
        ObjectKind::Array(a) => SizeRule::Repeat {
            child: a.child(),
            count: a.count(),
        },
        ObjectKind::StructInst(s) => SizeRule::SameAs(s.layout()),
        ObjectKind::StructDef(_) => SizeRule::Aggregate,
        ObjectKind::Routine(_) | ObjectKind::Label => SizeRule::None,
    };

    let size = match rule {
        SizeRule::Fixed(width) => {
            width_bytes(width, mode).ok_or(LayoutError::BadWidth(label))?
        }
        SizeRule::Repeat { child, count } => {
            if count == 0 {
                return Err(ObjectError::ZeroCount(label).into());
            }
            let child = child.ok_or(LayoutError::MissingChild(label))?;
            size_of(registry, child, mode)? * count
        }
        SizeRule::SameAs(layout) => size_of(registry, layout, mode)?,
        SizeRule::Aggregate => layout_struct(registry, id, mode)?,
        SizeRule::None => return Err(LayoutError::Unsizable(label).into()),
    };

    registry.get_mut(id).set_size(size);
    Ok(size)
}

/// The natural alignment of an object, capped at the mode's maximum.
/// Sizes must already be resolved.
pub fn align_of(registry: &Registry, id: ObjectId, mode: Mode) -> Result<u64> {
    let align = match registry.get(id).kind() {
        ObjectKind::Prime(_) => registry
            .get(id)
            .size()
            .ok_or_else(|| LayoutError::Unsizable(registry.get(id).label().into()))?,
        ObjectKind::Array(a) => {
            let child = a
                .child()
                .ok_or_else(|| LayoutError::MissingChild(registry.get(id).label().into()))?;
            align_of(registry, child, mode)?
        }
        ObjectKind::StructInst(s) => align_of(registry, s.layout(), mode)?,
        ObjectKind::StructDef(s) => {
            let mut max = 1;
            for member in s.members() {
                max = max.max(align_of(registry, *member, mode)?);
            }
            max
        }
        ObjectKind::Routine(_) | ObjectKind::Label => {
            return Err(LayoutError::Unsizable(registry.get(id).label().into()).into())
        }
    };
    Ok(align.min(mode.max_align()))
}

/// Assign member offsets and compute the aggregate size of one structure.
fn layout_struct(registry: &mut Registry, def: ObjectId, mode: Mode) -> Result<u64> {
    let members: Vec<ObjectId> = registry.get(def).as_struct_def()?.members().to_vec();

    // size every member before alignment is meaningful
    for member in &members {
        size_of(registry, *member, mode)?;
    }

    let mut offset = 0;
    for member in &members {
        let size = size_of(registry, *member, mode)?;
        let align = align_of(registry, *member, mode)?;
        offset = round_up(offset, align);
        registry.get_mut(*member).set_offset(offset);
        offset += size;
    }

    registry.get_mut(def).set_size(offset);
    Ok(offset)
}

/// Lay out a routine's formal parameter slots and automatic storage.
fn layout_routine(registry: &mut Registry, rid: ObjectId, mode: Mode) -> Result<()> {
    let routine = registry.get(rid).as_routine()?;
    let formals = routine.formals();
    let autos = routine.autos();

    // each formal parameter takes one pointer-width slot
    let params: Vec<ObjectId> = registry.get(formals).as_struct_def()?.members().to_vec();
    for (i, param) in params.iter().enumerate() {
        size_of(registry, *param, mode)?;
        registry.get_mut(*param).set_offset(i as u64 * mode.ptr_width());
    }
    registry
        .get_mut(formals)
        .set_size(params.len() as u64 * mode.ptr_width());

    // automatics get structure layout, rounded up to the pointer width
    let autos_size = layout_struct(registry, autos, mode)?;
    let rounded = round_up(autos_size, mode.ptr_width());
    registry.get_mut(autos).set_size(rounded);

    debug!(
        "layout: routine {}: {} parameter bytes, {} automatic bytes",
        registry.get(rid).label(),
        params.len() as u64 * mode.ptr_width(),
        rounded
    );
    Ok(())
}

fn width_bytes(width: Width, mode: Mode) -> Option<u64> {
    match width {
        Width::Byte => Some(1),
        Width::Byte2 => Some(2),
        Width::Byte4 => Some(4),
        Width::Byte8 => {
            if mode == Mode::Long {
                Some(8)
            } else {
                None
            }
        }
        Width::Word | Width::Max | Width::Ptr => Some(mode.ptr_width()),
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::compiler::obj::{Object, StorageClass};

    fn member(reg: &mut Registry, label: &str, width: Width) -> ObjectId {
        let mut obj = Object::prime(label, width, false);
        obj.set_sclass(StorageClass::Member).unwrap();
        reg.alloc(obj)
    }

    #[test]
    fn test_scalar_widths_per_mode() {
        for (width, protected, long) in vec![
            (Width::Byte, Some(1), Some(1)),
            (Width::Byte2, Some(2), Some(2)),
            (Width::Byte4, Some(4), Some(4)),
            (Width::Byte8, None, Some(8)),
            (Width::Word, Some(4), Some(8)),
            (Width::Ptr, Some(4), Some(8)),
            (Width::Max, Some(4), Some(8)),
        ] {
            assert_eq!(width_bytes(width, Mode::Protected), protected);
            assert_eq!(width_bytes(width, Mode::Long), long);
        }
    }

    #[test]
    fn test_eight_byte_scalar_outside_long_mode_fails() {
        let mut reg = Registry::new();
        let mut obj = Object::prime("x", Width::Byte8, false);
        obj.set_sclass(StorageClass::Private).unwrap();
        let id = reg.add(obj).unwrap();
        assert!(size_of(&mut reg, id, Mode::Protected).is_err());
        assert_eq!(size_of(&mut reg, id, Mode::Long).unwrap(), 8);
    }

    #[test]
    fn test_array_of_ten_dwords_is_forty_bytes() {
        let mut reg = Registry::new();
        let elem = reg.alloc(Object::prime("", Width::Byte4, false));
        let mut arr = Object::array("arr", Some(elem), 10);
        arr.set_sclass(StorageClass::Private).unwrap();
        let id = reg.add(arr).unwrap();
        assert_eq!(size_of(&mut reg, id, Mode::Long).unwrap(), 40);
    }

    #[test]
    fn test_zero_count_array_fails() {
        let mut reg = Registry::new();
        let elem = reg.alloc(Object::prime("", Width::Byte4, false));
        let mut arr = Object::array("arr", Some(elem), 0);
        arr.set_sclass(StorageClass::Private).unwrap();
        let id = reg.add(arr).unwrap();
        assert!(size_of(&mut reg, id, Mode::Long).is_err());
    }

    #[test]
    fn test_array_without_element_type_fails() {
        let mut reg = Registry::new();
        let mut arr = Object::array("arr", None, 4);
        arr.set_sclass(StorageClass::Private).unwrap();
        let id = reg.add(arr).unwrap();
        assert!(size_of(&mut reg, id, Mode::Long).is_err());
    }

    #[test]
    fn test_members_pad_to_their_own_alignment() {
        // one 4-byte member then one 8-byte member: the second pads to
        // offset 8 and the aggregate is 16
        let mut reg = Registry::new();
        let a = member(&mut reg, "a", Width::Byte4);
        let b = member(&mut reg, "b", Width::Byte8);
        let mut def = Object::struct_def("pair");
        def.set_sclass(StorageClass::Private).unwrap();
        let def = reg.add(def).unwrap();
        reg.get_mut(def).as_struct_def_mut().unwrap().add_member(a);
        reg.get_mut(def).as_struct_def_mut().unwrap().add_member(b);

        assert_eq!(size_of(&mut reg, def, Mode::Long).unwrap(), 16);
        assert_eq!(reg.get(a).offset(), Some(0));
        assert_eq!(reg.get(b).offset(), Some(8));
    }

    #[test]
    fn test_power_of_two_members_offset_multiples() {
        let mut reg = Registry::new();
        let widths = vec![
            ("m1", Width::Byte),
            ("m2", Width::Byte4),
            ("m3", Width::Byte2),
            ("m4", Width::Byte8),
            ("m5", Width::Byte),
        ];
        let mut def = Object::struct_def("mix");
        def.set_sclass(StorageClass::Private).unwrap();
        let def = reg.add(def).unwrap();
        let mut members = vec![];
        for (label, width) in widths {
            let m = member(&mut reg, label, width);
            reg.get_mut(def).as_struct_def_mut().unwrap().add_member(m);
            members.push(m);
        }

        let total = size_of(&mut reg, def, Mode::Long).unwrap();
        let mut sum = 0;
        for m in members {
            let size = reg.get(m).size().unwrap();
            let offset = reg.get(m).offset().unwrap();
            assert_eq!(offset % size, 0, "member not aligned to its size");
            sum += size;
        }
        assert!(total >= sum);
    }

    #[test]
    fn test_alignment_caps_at_the_mode_maximum() {
        let mut reg = Registry::new();
        let a = member(&mut reg, "a", Width::Byte4);
        let b = member(&mut reg, "b", Width::Byte8);
        let mut def = Object::struct_def("pair");
        def.set_sclass(StorageClass::Private).unwrap();
        let def = reg.add(def).unwrap();
        reg.get_mut(def).as_struct_def_mut().unwrap().add_member(a);
        reg.get_mut(def).as_struct_def_mut().unwrap().add_member(b);

        size_of(&mut reg, def, Mode::Long).unwrap();
        assert_eq!(align_of(&reg, def, Mode::Long).unwrap(), 8);
        assert_eq!(align_of(&reg, b, Mode::Long).unwrap(), 8);
    }

    #[test]
    fn test_shared_layout_sizes_instances() {
        let mut reg = Registry::new();
        let a = member(&mut reg, "a", Width::Byte4);
        let mut def = Object::struct_def("point");
        def.set_sclass(StorageClass::Private).unwrap();
        let def = reg.add(def).unwrap();
        reg.get_mut(def).as_struct_def_mut().unwrap().add_member(a);

        let mut inst = Object::struct_inst("origin", def);
        inst.set_sclass(StorageClass::Private).unwrap();
        let inst = reg.add(inst).unwrap();

        assert_eq!(size_of(&mut reg, inst, Mode::Long).unwrap(), 4);
    }

    #[test]
    fn test_routine_parameters_get_pointer_slots() {
        let mut reg = Registry::new();
        let p0 = member(&mut reg, "p0", Width::Byte4);
        let p1 = member(&mut reg, "p1", Width::Byte4);
        let formals = reg.alloc(Object::struct_def("f_params"));
        reg.get_mut(formals)
            .as_struct_def_mut()
            .unwrap()
            .add_member(p0);
        reg.get_mut(formals)
            .as_struct_def_mut()
            .unwrap()
            .add_member(p1);
        let autos = reg.alloc(Object::struct_def("f_autos"));
        let mut routine = Object::routine("f", formals, autos);
        routine.set_sclass(StorageClass::Public).unwrap();
        let rid = reg.add(routine).unwrap();

        resolve(&mut reg, Mode::Long).unwrap();

        assert_eq!(reg.get(p0).offset(), Some(0));
        assert_eq!(reg.get(p1).offset(), Some(8));
        let formals = reg.get(rid).as_routine().unwrap().formals();
        assert_eq!(reg.get(formals).size(), Some(16));
    }

    #[test]
    fn test_frame_rounds_to_pointer_width() {
        // a single 4-byte automatic still reserves 8 frame bytes in long mode
        let mut reg = Registry::new();
        let v = member(&mut reg, "v", Width::Byte4);
        let formals = reg.alloc(Object::struct_def("f_params"));
        let autos = reg.alloc(Object::struct_def("f_autos"));
        reg.get_mut(autos)
            .as_struct_def_mut()
            .unwrap()
            .add_member(v);
        let mut routine = Object::routine("f", formals, autos);
        routine.set_sclass(StorageClass::Public).unwrap();
        let rid = reg.add(routine).unwrap();

        resolve(&mut reg, Mode::Long).unwrap();

        let autos = reg.get(rid).as_routine().unwrap().autos();
        assert_eq!(reg.get(autos).size(), Some(8));
    }
}
