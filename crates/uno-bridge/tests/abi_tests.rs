//! Dispatch under the 32-bit ARM conventions, over hand-built frames

#![cfg(not(target_arch = "arm"))]

mod common;

use std::ffi::c_void;

use common::{release, Harness};
use uno_bridge::abi::{Aapcs32, ArmVariant, CallConvention, CallFrame, RegisterReturn};
use uno_bridge::mediate;
use uno_sdk::{InterfaceBuilder, MethodParameter, TypeClass, TypeRef};

const POSITION: u32 = 3;
const SCALED: u32 = 4;

/// `test.XShape` returning `test.RealPoint2D { X, Y: double }`
fn register_shape(h: &Harness) -> (TypeRef, TypeRef) {
    let double = TypeRef::builtin(TypeClass::Double);
    let point = h
        .types
        .register_struct("test.RealPoint2D", None, &[("X", double.clone()), ("Y", double.clone())])
        .unwrap();
    let shape = h
        .types
        .register_interface(
            InterfaceBuilder::new("test.XShape")
                .method("position", point.clone(), vec![])
                .method("scaled", point.clone(), vec![MethodParameter::input("factor", double)]),
        )
        .unwrap();
    (point, shape)
}

#[test]
fn test_vfp_returns_float_aggregate_in_registers() {
    let h = Harness::new();
    let (point, shape) = register_shape(&h);
    let object = h.object(|call| unsafe {
        match call.name() {
            "position" => call.set_return([1.5f64, -2.0]),
            "scaled" => {
                let factor = call.arg::<f64>(0);
                call.set_return([1.5 * factor, -2.0 * factor]);
            }
            other => panic!("unexpected member {other}"),
        }
        Ok(())
    });
    let native = h.map(&object, "shape;1", &shape);

    let vfp = Aapcs32::new(ArmVariant::EabiVfp);
    assert!(!vfp.return_in_hidden_param(&point, &h.types));
    assert!(Aapcs32::new(ArmVariant::Eabi).return_in_hidden_param(&point, &h.types));

    // d0-d7 spill, then r0-r3
    let mut frame = [0u64; 10];
    frame[8] = native.as_ptr() as usize as u64;
    let stack = unsafe { frame.as_mut_ptr().add(8) } as *mut *mut c_void;

    let mut rr: RegisterReturn = [0; 4];
    let class = unsafe { mediate(&vfp, POSITION, 0, stack, &mut rr) }.unwrap();
    assert_eq!(class, TypeClass::Struct);
    assert_eq!([f64::from_bits(rr[0]), f64::from_bits(rr[1])], [1.5, -2.0]);
    assert_eq!(object.calls(), 1);

    // factor arrives in d0
    frame[0] = 2.0f64.to_bits();
    let mut rr: RegisterReturn = [0; 4];
    let class = unsafe { mediate(&vfp, SCALED, 0, stack, &mut rr) }.unwrap();
    assert_eq!(class, TypeClass::Struct);
    assert_eq!([f64::from_bits(rr[0]), f64::from_bits(rr[1])], [3.0, -4.0]);

    // the executor reloads d0-d3 from the spill area
    unsafe { vfp.store_register_return(CallFrame::new(stack), &rr) };
    assert_eq!(frame[..4], rr[..]);
    assert_eq!(frame[8], native.as_ptr() as usize as u64);

    assert_eq!(object.calls(), 2);
    assert_eq!(h.types.outstanding(), 0);
    unsafe { release(native) };
    assert_eq!(object.refs(), 0);
}

#[test]
fn test_soft_float_leaves_spill_area_alone() {
    let eabi = Aapcs32::new(ArmVariant::Eabi);
    let mut frame = [7u64; 10];
    let stack = unsafe { frame.as_mut_ptr().add(8) } as *mut *mut c_void;
    unsafe { eabi.store_register_return(CallFrame::new(stack), &[1, 2, 3, 4]) };
    assert_eq!(frame, [7u64; 10]);
}
