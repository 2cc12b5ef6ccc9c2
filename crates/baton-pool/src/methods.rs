//! Method tables of the pool types, as seen by the interception layer.

use baton_core::TypeDescriptor;
use baton_core::instrument::MethodSignature;

pub const CALLABLE_VEC: TypeDescriptor = TypeDescriptor::from_static("Vec<Callable>");

const RUNNABLE: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE];
const CALLABLE: &[TypeDescriptor] = &[TypeDescriptor::CALLABLE];
const CALLABLES: &[TypeDescriptor] = &[CALLABLE_VEC];
const RUNNABLE_CORE: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE, TypeDescriptor::BOOL];
const RUNNABLE_DELAY: &[TypeDescriptor] = &[TypeDescriptor::RUNNABLE, TypeDescriptor::DURATION];
const CALLABLE_DELAY: &[TypeDescriptor] = &[TypeDescriptor::CALLABLE, TypeDescriptor::DURATION];
const RUNNABLE_RATE: &[TypeDescriptor] = &[
    TypeDescriptor::RUNNABLE,
    TypeDescriptor::DURATION,
    TypeDescriptor::DURATION,
];

pub const EXECUTE: MethodSignature = MethodSignature::from_static("execute", RUNNABLE);
pub const SUBMIT: MethodSignature = MethodSignature::from_static("submit", CALLABLE);
pub const INVOKE_ALL: MethodSignature = MethodSignature::from_static("invoke_all", CALLABLES);
pub const SHUTDOWN: MethodSignature = MethodSignature::from_static("shutdown", &[]);
pub const ADD_WORKER: MethodSignature = MethodSignature::from_static("add_worker", RUNNABLE_CORE);

pub const SCHEDULE: MethodSignature = MethodSignature::from_static("schedule", RUNNABLE_DELAY);
pub const SCHEDULE_CALLABLE: MethodSignature =
    MethodSignature::from_static("schedule_callable", CALLABLE_DELAY);
pub const SCHEDULE_AT_FIXED_RATE: MethodSignature =
    MethodSignature::from_static("schedule_at_fixed_rate", RUNNABLE_RATE);
