//! Lowers an expression graph to x86-64 scalar SSE2 code.
//!
//! Post-order traversal: every node is reduced to a value living in one of
//! XMM1..XMM7 (XMM0 is reserved for call arguments/results and the final
//! return). When the register file runs out, the oldest live value spills
//! to an 8-byte slot below `rbp`; calls spill everything because both
//! supported conventions treat every XMM register as caller-saved.
//!
//! Shared nodes (the parser caches one `Var` node per identifier) are
//! materialised once: a use count per node decides when a value dies, and
//! the destructive two-operand SSE forms copy to a fresh register whenever
//! the left operand is still needed by a later parent.

use log::debug;

use crate::builtins;
use crate::error::JitError;
use crate::exec::{CodeBuffer, CompiledCode};
use crate::graph::{ExprGraph, Node, NodeId};

const MAX_SPILL_SLOTS: u32 = 256;
// The Microsoft x64 convention gives every callee 32 bytes of spill space
// above the return address; System V has no such region.
const SHADOW_BYTES: u32 = if cfg!(windows) { 32 } else { 0 };

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Xmm(u8);

const XMM0: Xmm = Xmm(0);

fn modrm_reg(reg: Xmm, rm: Xmm) -> u8 {
    0xC0 | (reg.0 << 3) | rm.0
}

/// Byte emitter for the small instruction vocabulary the generator needs.
/// XMM operands stay below 8, so no REX bits are ever required for them.
struct Asm {
    buf: CodeBuffer,
}

impl Asm {
    fn new(buf: CodeBuffer) -> Self {
        Self { buf }
    }

    fn into_buf(self) -> CodeBuffer {
        self.buf
    }

    fn push_rbp(&mut self) -> Result<(), JitError> {
        self.buf.write(&[0x55])
    }

    fn mov_rbp_rsp(&mut self) -> Result<(), JitError> {
        self.buf.write(&[0x48, 0x89, 0xE5])
    }

    /// `sub rsp, imm32` with a zero placeholder; returns the offset of the
    /// immediate so the frame size can be patched in after emission.
    fn sub_rsp_imm32(&mut self) -> Result<usize, JitError> {
        self.buf.write(&[0x48, 0x81, 0xEC])?;
        let at = self.buf.pos();
        self.buf.write(&[0, 0, 0, 0])?;
        Ok(at)
    }

    fn leave(&mut self) -> Result<(), JitError> {
        self.buf.write(&[0xC9])
    }

    fn ret(&mut self) -> Result<(), JitError> {
        self.buf.write(&[0xC3])
    }

    fn mov_rax_imm64(&mut self, value: u64) -> Result<(), JitError> {
        self.buf.write(&[0x48, 0xB8])?;
        self.buf.write(&value.to_le_bytes())
    }

    fn call_rax(&mut self) -> Result<(), JitError> {
        self.buf.write(&[0xFF, 0xD0])
    }

    fn movaps(&mut self, dst: Xmm, src: Xmm) -> Result<(), JitError> {
        self.buf.write(&[0x0F, 0x28, modrm_reg(dst, src)])
    }

    fn xorpd(&mut self, dst: Xmm, src: Xmm) -> Result<(), JitError> {
        self.buf.write(&[0x66, 0x0F, 0x57, modrm_reg(dst, src)])
    }

    fn addsd(&mut self, dst: Xmm, src: Xmm) -> Result<(), JitError> {
        self.buf.write(&[0xF2, 0x0F, 0x58, modrm_reg(dst, src)])
    }

    fn mulsd(&mut self, dst: Xmm, src: Xmm) -> Result<(), JitError> {
        self.buf.write(&[0xF2, 0x0F, 0x59, modrm_reg(dst, src)])
    }

    fn subsd(&mut self, dst: Xmm, src: Xmm) -> Result<(), JitError> {
        self.buf.write(&[0xF2, 0x0F, 0x5C, modrm_reg(dst, src)])
    }

    /// `movsd dst, [rax]`
    fn movsd_load_rax(&mut self, dst: Xmm) -> Result<(), JitError> {
        self.buf.write(&[0xF2, 0x0F, 0x10, dst.0 << 3])
    }

    /// `movsd dst, [rip+disp]` reading `value` from the constant pool.
    /// Pool and code share one mapping, so the displacement always fits.
    fn movsd_load_pool(&mut self, dst: Xmm, value: f64) -> Result<(), JitError> {
        let off = self.buf.reserve_const8(value)?;
        let disp = off as i64 - (self.buf.pos() as i64 + 8);
        debug_assert!(i32::try_from(disp).is_ok());
        self.buf.write(&[0xF2, 0x0F, 0x10, 0x05 | (dst.0 << 3)])?;
        self.buf.write(&(disp as i32).to_le_bytes())
    }

    /// `movsd dst, [rbp+disp]`
    fn movsd_load_rbp(&mut self, dst: Xmm, disp: i32) -> Result<(), JitError> {
        self.buf.write(&[0xF2, 0x0F, 0x10, 0x85 | (dst.0 << 3)])?;
        self.buf.write(&disp.to_le_bytes())
    }

    /// `movsd [rbp+disp], src`
    fn movsd_store_rbp(&mut self, src: Xmm, disp: i32) -> Result<(), JitError> {
        self.buf.write(&[0xF2, 0x0F, 0x11, 0x85 | (src.0 << 3)])?;
        self.buf.write(&disp.to_le_bytes())
    }
}

/// Spill slot allocator. Slots are recycled through a free list; the
/// monotone `next` is the high-water mark that sizes the frame.
struct Slots {
    free: Vec<u32>,
    next: u32,
}

impl Slots {
    fn alloc(&mut self) -> Result<u32, JitError> {
        if let Some(s) = self.free.pop() {
            return Ok(s);
        }
        if self.next == MAX_SPILL_SLOTS {
            return Err(JitError::TooManySpills {
                max: MAX_SPILL_SLOTS,
            });
        }
        let s = self.next;
        self.next += 1;
        Ok(s)
    }

    fn release(&mut self, slot: u32) {
        self.free.push(slot);
    }

    fn high_water(&self) -> u32 {
        self.next
    }
}

fn slot_disp(slot: u32) -> i32 {
    -8 * (slot as i32 + 1)
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Loc {
    Reg(Xmm),
    Stack(u32),
}

type ValueId = usize;

#[derive(Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
}

/// Compiles `graph` rooted at `root` into `buf` and seals the result.
pub(crate) fn generate(
    graph: &ExprGraph,
    root: NodeId,
    buf: CodeBuffer,
) -> Result<CompiledCode, JitError> {
    CodeGen::new(graph, buf).run(root)
}

struct CodeGen<'g> {
    graph: &'g ExprGraph,
    asm: Asm,
    /// Remaining uses per node, from edge-counting the DAG.
    uses: Vec<u32>,
    /// Result value of an already-emitted shared node.
    memo: Vec<Option<ValueId>>,
    vals: Vec<Option<Loc>>,
    /// Live values, oldest first; the spill victim order.
    order: Vec<ValueId>,
    free_regs: Vec<Xmm>,
    slots: Slots,
}

impl<'g> CodeGen<'g> {
    fn new(graph: &'g ExprGraph, buf: CodeBuffer) -> Self {
        Self {
            graph,
            asm: Asm::new(buf),
            uses: vec![0; graph.len()],
            memo: vec![None; graph.len()],
            vals: Vec::new(),
            order: Vec::new(),
            free_regs: (1u8..=7).rev().map(Xmm).collect(),
            slots: Slots {
                free: Vec::new(),
                next: 0,
            },
        }
    }

    fn run(mut self, root: NodeId) -> Result<CompiledCode, JitError> {
        self.count_uses(root);

        self.asm.push_rbp()?;
        self.asm.mov_rbp_rsp()?;
        let frame_at = self.asm.sub_rsp_imm32()?;

        let result = self.emit(root)?;
        match self.vals[result] {
            Some(Loc::Reg(r)) => {
                if r != XMM0 {
                    self.asm.movaps(XMM0, r)?;
                }
            }
            Some(Loc::Stack(s)) => self.asm.movsd_load_rbp(XMM0, slot_disp(s))?,
            None => unreachable!("root value freed before the epilogue"),
        }
        self.asm.leave()?;
        self.asm.ret()?;

        // rsp is 16-byte aligned after `push rbp`; keeping the frame a
        // multiple of 16 keeps every call site aligned.
        let spill_bytes = (self.slots.high_water() * 8 + 15) & !15;
        let frame = spill_bytes + SHADOW_BYTES;
        let mut buf = self.asm.into_buf();
        buf.patch32(frame_at, frame);
        debug!(
            "emitted {} code bytes, {} spill slots, frame {} bytes",
            buf.pos(),
            self.slots.high_water(),
            frame
        );
        debug!("code: {:02x?}", buf.code());
        buf.seal()
    }

    fn count_uses(&mut self, root: NodeId) {
        fn touch(uses: &mut [u32], stack: &mut Vec<NodeId>, child: NodeId) {
            uses[child.index()] += 1;
            if uses[child.index()] == 1 {
                stack.push(child);
            }
        }

        self.uses[root.index()] = 1;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            match self.graph.node(id) {
                Node::Imm(_) | Node::Var(_) => {}
                Node::Neg(a) | Node::Recip(a) | Node::Call1(_, a) => {
                    touch(&mut self.uses, &mut stack, a);
                }
                Node::Add(a, b) | Node::Sub(a, b) | Node::Mul(a, b) | Node::Call2(_, a, b) => {
                    touch(&mut self.uses, &mut stack, a);
                    touch(&mut self.uses, &mut stack, b);
                }
                Node::Call3(_, a, b, c) => {
                    touch(&mut self.uses, &mut stack, a);
                    touch(&mut self.uses, &mut stack, b);
                    touch(&mut self.uses, &mut stack, c);
                }
            }
        }
    }

    fn emit(&mut self, id: NodeId) -> Result<ValueId, JitError> {
        if let Some(v) = self.memo[id.index()] {
            return Ok(v);
        }
        let value = match self.graph.node(id) {
            Node::Imm(c) => {
                let dst = self.alloc_reg(&[])?;
                self.asm.movsd_load_pool(dst, c)?;
                self.new_value(Loc::Reg(dst))
            }
            Node::Var(addr) => {
                let dst = self.alloc_reg(&[])?;
                self.asm.mov_rax_imm64(addr as u64)?;
                self.asm.movsd_load_rax(dst)?;
                self.new_value(Loc::Reg(dst))
            }
            Node::Add(a, b) => self.binary(a, b, BinOp::Add)?,
            Node::Sub(a, b) => self.binary(a, b, BinOp::Sub)?,
            Node::Mul(a, b) => self.binary(a, b, BinOp::Mul)?,
            Node::Neg(a) => self.negate(a)?,
            Node::Recip(a) => self.call(builtins::recip as usize, &[a])?,
            Node::Call1(f, a) => self.call(f as usize, &[a])?,
            Node::Call2(f, a, b) => self.call(f as usize, &[a, b])?,
            Node::Call3(f, a, b, c) => self.call(f as usize, &[a, b, c])?,
        };
        if self.uses[id.index()] > 1 {
            self.memo[id.index()] = Some(value);
        }
        Ok(value)
    }

    fn binary(&mut self, l: NodeId, r: NodeId, op: BinOp) -> Result<ValueId, JitError> {
        let lv = self.emit(l)?;
        let rv = self.emit(r)?;
        let lreg = self.ensure_reg(lv, &[rv])?;
        let rreg = self.ensure_reg(rv, &[lv])?;
        let lrem = self.consume(l);
        let rrem = self.consume(r);
        let dst = if lrem > 0 {
            // the left value is a cached subresult other parents still need
            let d = self.alloc_reg(&[lv, rv])?;
            self.asm.movaps(d, lreg)?;
            d
        } else {
            self.drop_value(lv, false);
            lreg
        };
        match op {
            BinOp::Add => self.asm.addsd(dst, rreg)?,
            BinOp::Sub => self.asm.subsd(dst, rreg)?,
            BinOp::Mul => self.asm.mulsd(dst, rreg)?,
        }
        if rrem == 0 {
            self.drop_value(rv, true);
        }
        Ok(self.new_value(Loc::Reg(dst)))
    }

    /// 0.0 - x, into a fresh register.
    fn negate(&mut self, a: NodeId) -> Result<ValueId, JitError> {
        let av = self.emit(a)?;
        let areg = self.ensure_reg(av, &[])?;
        let arem = self.consume(a);
        let dst = self.alloc_reg(&[av])?;
        self.asm.xorpd(dst, dst)?;
        self.asm.subsd(dst, areg)?;
        if arem == 0 {
            self.drop_value(av, true);
        }
        Ok(self.new_value(Loc::Reg(dst)))
    }

    fn call(&mut self, fptr: usize, args: &[NodeId]) -> Result<ValueId, JitError> {
        debug_assert!((1..=3).contains(&args.len()));
        let mut argv = [0usize; 3];
        for (i, &a) in args.iter().enumerate() {
            argv[i] = self.emit(a)?;
        }

        // Every XMM register is caller-saved in both supported conventions,
        // so anything live moves to the stack before the call.
        self.spill_live()?;

        for (i, &av) in argv[..args.len()].iter().enumerate() {
            match self.vals[av] {
                Some(Loc::Stack(s)) => self.asm.movsd_load_rbp(Xmm(i as u8), slot_disp(s))?,
                _ => unreachable!("argument value not spilled before call"),
            }
        }
        for (&a, &av) in args.iter().zip(&argv[..args.len()]) {
            if self.consume(a) == 0 {
                self.drop_value(av, true);
            }
        }

        self.asm.mov_rax_imm64(fptr as u64)?;
        self.asm.call_rax()?;

        let dst = self.alloc_reg(&[])?;
        self.asm.movaps(dst, XMM0)?;
        Ok(self.new_value(Loc::Reg(dst)))
    }

    fn spill_live(&mut self) -> Result<(), JitError> {
        for i in 0..self.order.len() {
            let v = self.order[i];
            if let Some(Loc::Reg(r)) = self.vals[v] {
                let s = self.slots.alloc()?;
                self.asm.movsd_store_rbp(r, slot_disp(s))?;
                self.vals[v] = Some(Loc::Stack(s));
                self.free_regs.push(r);
            }
        }
        Ok(())
    }

    /// A free register, spilling the oldest live value (never one in
    /// `keep`) when the file is full.
    fn alloc_reg(&mut self, keep: &[ValueId]) -> Result<Xmm, JitError> {
        if let Some(r) = self.free_regs.pop() {
            return Ok(r);
        }
        let victim = self
            .order
            .iter()
            .copied()
            .find(|v| !keep.contains(v) && matches!(self.vals[*v], Some(Loc::Reg(_))))
            .expect("xmm file full with no spillable value");
        let Some(Loc::Reg(r)) = self.vals[victim] else {
            unreachable!()
        };
        let s = self.slots.alloc()?;
        self.asm.movsd_store_rbp(r, slot_disp(s))?;
        self.vals[victim] = Some(Loc::Stack(s));
        Ok(r)
    }

    fn ensure_reg(&mut self, v: ValueId, keep: &[ValueId]) -> Result<Xmm, JitError> {
        match self.vals[v] {
            Some(Loc::Reg(r)) => Ok(r),
            Some(Loc::Stack(s)) => {
                let r = self.alloc_reg(keep)?;
                self.asm.movsd_load_rbp(r, slot_disp(s))?;
                self.slots.release(s);
                self.vals[v] = Some(Loc::Reg(r));
                Ok(r)
            }
            None => unreachable!("use of a freed value"),
        }
    }

    fn new_value(&mut self, loc: Loc) -> ValueId {
        let id = self.vals.len();
        self.vals.push(Some(loc));
        self.order.push(id);
        id
    }

    fn drop_value(&mut self, v: ValueId, recycle: bool) {
        if let Some(loc) = self.vals[v].take() {
            self.order.retain(|&x| x != v);
            if recycle {
                match loc {
                    Loc::Reg(r) => self.free_regs.push(r),
                    Loc::Stack(s) => self.slots.release(s),
                }
            }
        }
    }

    fn consume(&mut self, n: NodeId) -> u32 {
        let uses = &mut self.uses[n.index()];
        debug_assert!(*uses > 0);
        *uses -= 1;
        *uses
    }
}
