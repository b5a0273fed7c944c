//! Scratch Variable Pool.
//!
//! A temporary is handed out with one pending use. Every read consumes a
//! use; when the count reaches zero and the temporary is not reserved, it
//! goes back to the free list for its type. Reserved temporaries survive
//! any number of writes and reads until `release`.

use log::trace;
use retarget_bytecode::TypeKey;
use rustc_hash::FxHashMap;

use crate::error::{CompileError, Result};
use crate::variable::{Site, VarId, VarKind, VarTable, Variable};

#[derive(Debug, Default)]
pub struct ScratchPool {
    free: FxHashMap<TypeKey, Vec<VarId>>,
    handed_out: Vec<VarId>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A temporary of `ty` with one pending use.
    pub fn get_temp(&mut self, vars: &mut VarTable, ty: TypeKey, site: Option<Site>) -> VarId {
        let id = match self.free.get_mut(&ty).and_then(Vec::pop) {
            Some(id) => id,
            None => {
                let id = vars.add(Variable::new(ty, VarKind::Temporary));
                self.handed_out.push(id);
                id
            }
        };
        let var = vars.get_mut(id);
        var.uses = 1;
        var.reserved = false;
        var.pooled = false;
        var.site = site;
        trace!("pool: hand out {:?}", id);
        id
    }

    /// Add `n` pending uses. No effect on non-temporaries.
    pub fn allocate(&mut self, vars: &mut VarTable, id: VarId, n: u32) -> Result<()> {
        let var = vars.get_mut(id);
        if !var.is_temporary() {
            return Ok(());
        }
        if var.pooled {
            return Err(CompileError::invariant(format!("allocate on pooled temporary {:?}", id)));
        }
        var.uses += n;
        Ok(())
    }

    /// Consume one use. Reading a pooled temporary is an invariant violation.
    pub fn use_var(&mut self, vars: &mut VarTable, id: VarId) -> Result<()> {
        let var = vars.get_mut(id);
        if !var.is_temporary() {
            return Ok(());
        }
        if var.pooled {
            return Err(CompileError::invariant(format!("read of pooled temporary {:?}", id)));
        }
        var.uses = var.uses.saturating_sub(1);
        if var.uses == 0 && !var.reserved {
            self.recycle(vars, id);
        }
        Ok(())
    }

    pub fn reserve(&mut self, vars: &mut VarTable, id: VarId) -> Result<()> {
        let var = vars.get_mut(id);
        if !var.is_temporary() {
            return Ok(());
        }
        if var.pooled {
            return Err(CompileError::invariant(format!("reserve of pooled temporary {:?}", id)));
        }
        var.reserved = true;
        Ok(())
    }

    /// Drop a reservation; the temporary is pooled if no uses remain.
    pub fn release(&mut self, vars: &mut VarTable, id: VarId) -> Result<()> {
        let var = vars.get_mut(id);
        if !var.is_temporary() {
            return Ok(());
        }
        if !var.reserved {
            let what = format!("release of unreserved temporary {:?}", id);
            return Err(CompileError::invariant(what));
        }
        var.reserved = false;
        if var.uses == 0 {
            self.recycle(vars, id);
        }
        Ok(())
    }

    fn recycle(&mut self, vars: &mut VarTable, id: VarId) {
        let var = vars.get_mut(id);
        var.pooled = true;
        self.free.entry(var.ty).or_default().push(id);
        trace!("pool: recycle {:?}", id);
    }

    /// Temporaries still reserved or with pending uses.
    pub fn outstanding(&self, vars: &VarTable) -> Vec<VarId> {
        self.handed_out
            .iter()
            .copied()
            .filter(|&id| {
                let var = vars.get(id);
                var.reserved || (!var.pooled && var.uses > 0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retarget_bytecode::Universe;

    fn setup() -> (Universe, VarTable, ScratchPool) {
        (Universe::new(), VarTable::new(), ScratchPool::new())
    }

    #[test]
    fn test_reuse_after_last_use() {
        let (u, mut vars, mut pool) = setup();
        let int = u.builtins().int32;
        let a = pool.get_temp(&mut vars, int, None);
        pool.use_var(&mut vars, a).unwrap();
        assert!(vars.get(a).pooled);
        let b = pool.get_temp(&mut vars, int, None);
        assert_eq!(a, b);
        // different type never shares
        let c = pool.get_temp(&mut vars, u.builtins().float32, None);
        assert_ne!(b, c);
    }

    #[test]
    fn test_allocate_delays_release() {
        let (u, mut vars, mut pool) = setup();
        let a = pool.get_temp(&mut vars, u.builtins().int32, None);
        pool.allocate(&mut vars, a, 2).unwrap();
        pool.use_var(&mut vars, a).unwrap();
        pool.use_var(&mut vars, a).unwrap();
        assert!(!vars.get(a).pooled);
        pool.use_var(&mut vars, a).unwrap();
        assert!(vars.get(a).pooled);
        assert!(matches!(pool.use_var(&mut vars, a), Err(CompileError::Invariant { .. })));
    }

    #[test]
    fn test_reservation() {
        let (u, mut vars, mut pool) = setup();
        let a = pool.get_temp(&mut vars, u.builtins().int32, None);
        pool.reserve(&mut vars, a).unwrap();
        pool.use_var(&mut vars, a).unwrap();
        assert!(!vars.get(a).pooled);
        assert_eq!(pool.outstanding(&vars), vec![a]);
        pool.release(&mut vars, a).unwrap();
        assert!(vars.get(a).pooled);
        assert!(pool.outstanding(&vars).is_empty());
        assert!(pool.release(&mut vars, a).is_err());
    }

    #[test]
    fn test_release_keeps_pending_use() {
        let (u, mut vars, mut pool) = setup();
        let a = pool.get_temp(&mut vars, u.builtins().int32, None);
        pool.reserve(&mut vars, a).unwrap();
        pool.release(&mut vars, a).unwrap();
        assert!(!vars.get(a).pooled);
        pool.use_var(&mut vars, a).unwrap();
        assert!(vars.get(a).pooled);
    }

    /// Pseudo-random operation sequences never observe a pooled read.
    #[test]
    fn test_pool_soundness_sequences() {
        let (u, mut vars, mut pool) = setup();
        let int = u.builtins().int32;
        let mut live: Vec<VarId> = Vec::new();
        let mut seed = 0x2545_F491_4F6C_DD1Du64;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            match seed % 5 {
                0 => live.push(pool.get_temp(&mut vars, int, None)),
                1 if !live.is_empty() => {
                    let id = live[(seed as usize / 5) % live.len()];
                    pool.allocate(&mut vars, id, 1).unwrap();
                }
                2 if !live.is_empty() => {
                    let idx = (seed as usize / 5) % live.len();
                    let id = live[idx];
                    pool.use_var(&mut vars, id).unwrap();
                    if vars.get(id).pooled {
                        live.swap_remove(idx);
                    }
                }
                3 if !live.is_empty() => {
                    let id = live[(seed as usize / 5) % live.len()];
                    if !vars.get(id).reserved {
                        pool.reserve(&mut vars, id).unwrap();
                    }
                }
                4 if !live.is_empty() => {
                    let idx = (seed as usize / 5) % live.len();
                    let id = live[idx];
                    if vars.get(id).reserved {
                        pool.release(&mut vars, id).unwrap();
                        if vars.get(id).pooled {
                            live.swap_remove(idx);
                        }
                    }
                }
                _ => {}
            }
            for &id in &live {
                assert!(!vars.get(id).pooled, "{:?} pooled while live", id);
            }
        }
    }
}
