//! Machine model for the torus-mesh SIMD accelerator.
//!
//! This crate has **no hardware access** — it is a pure model of the
//! machine: mesh topology and neighbor routing, the 16-bit
//! reduced-precision scalar encoding, the broadcast instruction set with
//! its binary kernel container, and the host-link register map.
//!
//! The accelerator is a single control unit driving an N×N torus of
//! identical processing elements (PEs). Every instruction is broadcast to
//! all PEs at once; conditional behavior exists only as per-PE write
//! masking. Each PE holds one 16-bit word per named matrix and exchanges
//! data with its four torus neighbors, one direction per step.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`topology`] | Mesh dimensions, row-major indexing, torus/edge neighbor routing |
//! | [`approx`] | 16-bit reduced-precision scalar and its arithmetic |
//! | [`isa`] | Broadcast instruction set, kernel container, binary encoding |
//! | [`regs`] | Host-link register map — offsets and bit definitions |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod approx;
pub mod isa;
pub mod regs;
pub mod topology;
