pub mod rhai_eval;
