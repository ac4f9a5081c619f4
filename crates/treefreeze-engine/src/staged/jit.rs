//! Native lowering of tree bytecode through Cranelift
//!
//! Every tree becomes one function with a block per instruction. The entry
//! function calls the trees in order, accumulates from `0.0` and divides by
//! the program's divisor, matching [`super::Vm::eval_row`] bit for bit.

use super::program::{Instr, Program, ProgramError};
use cranelift_codegen::ir::condcodes::FloatCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block, InstBuilder, MemFlags, Signature, UserFuncName,
};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use thiserror::Error;
use tracing::debug;

/// Cranelift setup or lowering failure
#[derive(Debug, Error)]
pub enum JitError {
    #[error("Failed to configure Cranelift: {0}")]
    Setting(String),

    #[error("Failed to create native ISA: {0}")]
    Isa(String),

    #[error("Cranelift compilation failed: {0}")]
    Backend(String),

    #[error("Refusing to compile invalid tree bytecode: {0}")]
    Program(#[from] ProgramError),
}

type EntryFn = unsafe extern "C" fn(*const f64) -> f64;

/// Machine code for one program. Owns the module holding the code memory.
pub struct JitProgram {
    _module: JITModule,
    entry: EntryFn,
    n_features: usize,
}

// SAFETY: JITModule owns the code memory and is never mutated after
// finalization. `entry` is valid for the module's lifetime.
unsafe impl Send for JitProgram {}
unsafe impl Sync for JitProgram {}

impl std::fmt::Debug for JitProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitProgram")
            .field("n_features", &self.n_features)
            .finish_non_exhaustive()
    }
}

impl JitProgram {
    /// Verify `program` and compile it for the host machine
    pub fn compile(program: &Program) -> Result<Self, JitError> {
        // Generated code reads row offsets and jumps to blocks unchecked
        program.verify()?;
        let mut module = host_module()?;
        let mut ctx = module.make_context();
        let mut fctx = FunctionBuilderContext::new();
        let signature = entry_signature(&module);

        let mut tree_ids = Vec::with_capacity(program.trees.len());
        for (k, code) in program.trees.iter().enumerate() {
            let id = module
                .declare_function(&format!("tree_{}", k), Linkage::Local, &signature)
                .map_err(backend)?;
            define_tree(&mut module, &mut ctx, &mut fctx, &signature, id, code)?;
            tree_ids.push(id);
        }

        let entry_id = module
            .declare_function("predict_proba", Linkage::Local, &signature)
            .map_err(backend)?;
        define_entry(
            &mut module,
            &mut ctx,
            &mut fctx,
            &signature,
            entry_id,
            &tree_ids,
            program.divisor,
        )?;

        module.finalize_definitions().map_err(backend)?;
        let ptr = module.get_finalized_function(entry_id);
        // SAFETY: the entry function was declared with `entry_signature`,
        // one pointer parameter and an f64 result in the host calling convention.
        let entry = unsafe { std::mem::transmute::<*const u8, EntryFn>(ptr) };

        debug!(trees = tree_ids.len(), "compiled staged program");
        Ok(Self {
            _module: module,
            entry,
            n_features: program.n_features as usize,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Aggregated result for one row
    ///
    /// # Panics
    ///
    /// Panics if `row` holds fewer than `n_features` values.
    #[inline]
    pub fn eval_row(&self, row: &[f64]) -> f64 {
        assert!(
            row.len() >= self.n_features,
            "row has {} values, program reads {}",
            row.len(),
            self.n_features
        );
        // SAFETY: generated code only loads offsets below n_features * 8.
        unsafe { (self.entry)(row.as_ptr()) }
    }
}

fn host_module() -> Result<JITModule, JitError> {
    let mut flag_builder = settings::builder();
    for (name, value) in [
        ("opt_level", "speed"),
        ("use_colocated_libcalls", "false"),
        ("is_pic", "false"),
    ] {
        flag_builder
            .set(name, value)
            .map_err(|e| JitError::Setting(format!("{}: {}", name, e)))?;
    }

    let isa = cranelift_native::builder()
        .map_err(|e| JitError::Isa(e.to_string()))?
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| JitError::Isa(e.to_string()))?;
    let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    Ok(JITModule::new(builder))
}

fn backend(e: impl std::fmt::Display) -> JitError {
    JitError::Backend(e.to_string())
}

/// `fn(row: *const f64) -> f64`
fn entry_signature(module: &JITModule) -> Signature {
    let mut signature = module.make_signature();
    let ptr_type = module.target_config().pointer_type();
    signature.params.push(AbiParam::new(ptr_type));
    signature.returns.push(AbiParam::new(types::F64));
    signature
}

fn define_tree(
    module: &mut JITModule,
    ctx: &mut Context,
    fctx: &mut FunctionBuilderContext,
    signature: &Signature,
    id: FuncId,
    code: &[Instr],
) -> Result<(), JitError> {
    ctx.func.signature = signature.clone();
    ctx.func.name = UserFuncName::user(0, id.as_u32());
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, fctx);
        let blocks: Vec<Block> = code.iter().map(|_| builder.create_block()).collect();
        let first = *blocks
            .first()
            .ok_or_else(|| JitError::Backend("empty tree".to_string()))?;
        builder.append_block_params_for_function_params(first);
        builder.switch_to_block(first);
        let row = builder.block_params(first)[0];

        for (pc, instr) in code.iter().enumerate() {
            if pc > 0 {
                builder.switch_to_block(blocks[pc]);
            }
            match *instr {
                Instr::Branch {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let offset = i32::try_from(u64::from(feature) * 8).map_err(|_| {
                        JitError::Backend(format!("feature {} out of addressable range", feature))
                    })?;
                    let x = builder
                        .ins()
                        .load(types::F64, MemFlags::trusted(), row, offset);
                    let t = builder.ins().f64const(threshold);
                    // Unordered (NaN) compares false and takes the right branch
                    let goes_left = builder.ins().fcmp(FloatCC::LessThanOrEqual, x, t);
                    builder.ins().brif(
                        goes_left,
                        blocks[left as usize],
                        &[],
                        blocks[right as usize],
                        &[],
                    );
                }
                Instr::Return(value) => {
                    let v = builder.ins().f64const(value);
                    builder.ins().return_(&[v]);
                }
            }
        }

        builder.seal_all_blocks();
        builder.finalize();
    }

    module.define_function(id, ctx).map_err(backend)?;
    module.clear_context(ctx);
    Ok(())
}

fn define_entry(
    module: &mut JITModule,
    ctx: &mut Context,
    fctx: &mut FunctionBuilderContext,
    signature: &Signature,
    id: FuncId,
    trees: &[FuncId],
    divisor: u32,
) -> Result<(), JitError> {
    ctx.func.signature = signature.clone();
    ctx.func.name = UserFuncName::user(0, id.as_u32());
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, fctx);
        let block = builder.create_block();
        builder.append_block_params_for_function_params(block);
        builder.switch_to_block(block);
        builder.seal_block(block);
        let row = builder.block_params(block)[0];

        let mut acc = builder.ins().f64const(0.0);
        for &tree in trees {
            let callee = module.declare_func_in_func(tree, builder.func);
            let call = builder.ins().call(callee, &[row]);
            let value = builder.inst_results(call)[0];
            acc = builder.ins().fadd(acc, value);
        }
        let d = builder.ins().f64const(f64::from(divisor));
        let result = builder.ins().fdiv(acc, d);
        builder.ins().return_(&[result]);
        builder.finalize();
    }

    module.define_function(id, ctx).map_err(backend)?;
    module.clear_context(ctx);
    Ok(())
}
