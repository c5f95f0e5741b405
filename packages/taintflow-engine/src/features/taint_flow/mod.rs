/*
 * Taint-Flow Analysis Feature
 *
 * Context-sensitive, rule-configurable taint propagation over a finalized
 * points-to graph and call graph.
 *
 * Architecture:
 * - domain/         : Facts, call-string contexts, declarative rule schema
 * - infrastructure/ : Compiled rules, edge maps, container model, transfer
 *                     executor, worklist solver, diagnostics, caches
 * - application/    : Engine orchestrator (seed → solve → detect)
 * - ports/          : Request/outcome DTOs + collaborator traits
 */

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;
