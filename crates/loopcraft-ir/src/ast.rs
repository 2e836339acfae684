//! Kernel AST: procedures, statements and expressions.
//!
//! Kernels are plain immutable values. Every scheduling primitive takes a
//! `&Proc` and builds a new one; nothing here is shared mutably between
//! the input and the output of a rewrite.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ============================================================================
// Types and memory spaces
// ============================================================================

/// Element type of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    F32,
    F64,
    I32,
    I8,
}

impl ScalarType {
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::I32 => "i32",
            ScalarType::I8 => "i8",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "f32" => Some(ScalarType::F32),
            "f64" => Some(ScalarType::F64),
            "i32" => Some(ScalarType::I32),
            "i8" => Some(ScalarType::I8),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a buffer lives.
///
/// `Dram` is ordinary addressable memory. The vector spaces model register
/// files: they only hold `f32` and never appear in a kernel signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemorySpace {
    #[serde(rename = "DRAM")]
    Dram,
    #[serde(rename = "AVX2")]
    Avx2,
    #[serde(rename = "AVX512")]
    Avx512,
}

impl MemorySpace {
    pub fn name(self) -> &'static str {
        match self {
            MemorySpace::Dram => "DRAM",
            MemorySpace::Avx2 => "AVX2",
            MemorySpace::Avx512 => "AVX512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DRAM" => Some(MemorySpace::Dram),
            "AVX2" => Some(MemorySpace::Avx2),
            "AVX512" => Some(MemorySpace::Avx512),
            _ => None,
        }
    }

    pub fn is_register(self) -> bool {
        !matches!(self, MemorySpace::Dram)
    }

    /// Vector width in elements of `ty`, or `None` for non-register spaces.
    pub fn lanes(self, ty: ScalarType) -> Option<u64> {
        match (self, ty) {
            (MemorySpace::Avx2, ScalarType::F32) => Some(8),
            (MemorySpace::Avx512, ScalarType::F32) => Some(16),
            _ => None,
        }
    }

    /// Whether buffers of element type `ty` may be placed here.
    pub fn supports(self, ty: ScalarType) -> bool {
        match self {
            MemorySpace::Dram => true,
            MemorySpace::Avx2 | MemorySpace::Avx512 => ty == ScalarType::F32,
        }
    }
}

impl std::fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Expressions
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    And,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::And => "and",
        }
    }

    /// Binding strength; larger binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::And => 1,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq => 2,
            BinOp::Add | BinOp::Sub => 3,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 4,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }
}

/// An expression.
///
/// Index expressions (loop bounds, buffer indices, window bounds, guards)
/// are integer-valued and built from `Var`, `Int` and arithmetic. Data
/// expressions additionally read buffers and carry float literals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Loop variable or size parameter.
    Var(String),
    Int(i64),
    Float(f64),
    /// Element read; an empty index list reads a scalar buffer.
    Read(String, Vec<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn read(buf: impl Into<String>, idx: Vec<Expr>) -> Self {
        Expr::Read(buf.into(), idx)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Direct sub-expressions, left to right.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Var(_) | Expr::Int(_) | Expr::Float(_) => vec![],
            Expr::Read(_, idx) => idx.iter().collect(),
            Expr::Binary(_, l, r) => vec![l, r],
            Expr::Neg(e) => vec![e],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Var(_) | Expr::Int(_) | Expr::Float(_) => vec![],
            Expr::Read(_, idx) => idx.iter_mut().collect(),
            Expr::Binary(_, l, r) => vec![&mut **l, &mut **r],
            Expr::Neg(e) => vec![&mut **e],
        }
    }

    pub fn mentions_var(&self, name: &str) -> bool {
        match self {
            Expr::Var(v) => v == name,
            _ => self.children().into_iter().any(|c| c.mentions_var(name)),
        }
    }

    pub fn free_vars(&self, out: &mut BTreeSet<String>) {
        if let Expr::Var(v) = self {
            out.insert(v.clone());
        }
        for child in self.children() {
            child.free_vars(out);
        }
    }

    pub fn reads_buffer(&self, buf: &str) -> bool {
        match self {
            Expr::Read(b, _) if b == buf => true,
            _ => self.children().into_iter().any(|c| c.reads_buffer(buf)),
        }
    }

    pub fn read_buffers(&self, out: &mut BTreeSet<String>) {
        if let Expr::Read(b, _) = self {
            out.insert(b.clone());
        }
        for child in self.children() {
            child.read_buffers(out);
        }
    }

    /// Replace every occurrence of the variable `name` by `value`.
    pub fn subst_var(&mut self, name: &str, value: &Expr) {
        match self {
            Expr::Var(v) if v == name => *self = value.clone(),
            _ => {
                for child in self.children_mut() {
                    child.subst_var(name, value);
                }
            }
        }
    }

    pub fn rename_var(&mut self, from: &str, to: &str) {
        self.subst_var(from, &Expr::var(to));
    }

    pub fn rename_buffer(&mut self, from: &str, to: &str) {
        if let Expr::Read(b, _) = self
            && b == from
        {
            *b = to.to_owned();
        }
        for child in self.children_mut() {
            child.rename_buffer(from, to);
        }
    }

    /// Follow `steps` through `children()`.
    pub fn at(&self, steps: &[usize]) -> Option<&Expr> {
        match steps.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children().get(*first)?.at(rest),
        }
    }

    pub fn at_mut(&mut self, steps: &[usize]) -> Option<&mut Expr> {
        match steps.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children_mut().into_iter().nth(*first)?.at_mut(rest),
        }
    }

    /// Binding strength used by the printer.
    pub fn precedence(&self) -> u8 {
        match self {
            Expr::Binary(op, _, _) => op.precedence(),
            Expr::Neg(_) => 5,
            Expr::Int(v) if *v < 0 => 5,
            Expr::Float(v) if v.is_sign_negative() => 5,
            _ => 6,
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, self, rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Sub, self, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mul, self, rhs)
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Div, self, rhs)
    }
}

impl std::ops::Rem for Expr {
    type Output = Expr;
    fn rem(self, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Mod, self, rhs)
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

// ============================================================================
// Statements
// ============================================================================

/// A buffer declaration, either a kernel parameter or a local allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BufferDecl {
    pub name: String,
    pub ty: ScalarType,
    pub shape: Vec<Expr>,
    pub mem: MemorySpace,
}

impl BufferDecl {
    pub fn new(name: impl Into<String>, ty: ScalarType, shape: Vec<Expr>, mem: MemorySpace) -> Self {
        Self {
            name: name.into(),
            ty,
            shape,
            mem,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    Par,
    Seq,
}

impl LoopMode {
    pub fn keyword(self) -> &'static str {
        match self {
            LoopMode::Par => "par",
            LoopMode::Seq => "seq",
        }
    }
}

/// `for var in mode(bound) { body }`, iterating `0..bound`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub var: String,
    pub bound: Expr,
    pub mode: LoopMode,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct If {
    pub cond: Expr,
    pub body: Block,
}

/// `buf[idx] = rhs` or, as a reduction, `buf[idx] += rhs`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    pub buf: String,
    pub idx: Vec<Expr>,
    pub rhs: Expr,
}

/// One dimension of a window argument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowDim {
    Point(Expr),
    /// Half-open `lo:hi`.
    Interval(Expr, Expr),
}

/// A view of a buffer passed to a template call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub buf: String,
    pub dims: Vec<WindowDim>,
}

impl Window {
    /// Number of interval dimensions, i.e. the rank seen by the callee.
    pub fn rank(&self) -> usize {
        self.dims
            .iter()
            .filter(|d| matches!(d, WindowDim::Interval(..)))
            .count()
    }

    pub fn exprs(&self) -> Vec<&Expr> {
        self.dims
            .iter()
            .flat_map(|d| match d {
                WindowDim::Point(e) => vec![e],
                WindowDim::Interval(lo, hi) => vec![lo, hi],
            })
            .collect()
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        self.dims
            .iter_mut()
            .flat_map(|d| match d {
                WindowDim::Point(e) => vec![e],
                WindowDim::Interval(lo, hi) => vec![lo, hi],
            })
            .collect()
    }
}

/// Invocation of a registered hardware template.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub template: String,
    pub args: Vec<Window>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Loop(Loop),
    If(If),
    Assign(Assign),
    Reduce(Assign),
    Alloc(BufferDecl),
    Call(Call),
}

impl Stmt {
    pub fn body(&self) -> Option<&Block> {
        match self {
            Stmt::Loop(l) => Some(&l.body),
            Stmt::If(i) => Some(&i.body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Block> {
        match self {
            Stmt::Loop(l) => Some(&mut l.body),
            Stmt::If(i) => Some(&mut i.body),
            _ => None,
        }
    }

    pub fn as_loop(&self) -> Option<&Loop> {
        match self {
            Stmt::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_alloc(&self) -> Option<&BufferDecl> {
        match self {
            Stmt::Alloc(d) => Some(d),
            _ => None,
        }
    }

    /// Expression slots owned directly by this statement.
    ///
    /// Order: loop bound; guard; indices then right-hand side; shape; window
    /// bounds in argument order. Expression cursors address these slots.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Loop(l) => vec![&l.bound],
            Stmt::If(i) => vec![&i.cond],
            Stmt::Assign(a) | Stmt::Reduce(a) => a.idx.iter().chain(Some(&a.rhs)).collect(),
            Stmt::Alloc(d) => d.shape.iter().collect(),
            Stmt::Call(c) => c.args.iter().flat_map(|w| w.exprs()).collect(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Stmt::Loop(l) => vec![&mut l.bound],
            Stmt::If(i) => vec![&mut i.cond],
            Stmt::Assign(a) | Stmt::Reduce(a) => {
                a.idx.iter_mut().chain(Some(&mut a.rhs)).collect()
            }
            Stmt::Alloc(d) => d.shape.iter_mut().collect(),
            Stmt::Call(c) => c.args.iter_mut().flat_map(|w| w.exprs_mut()).collect(),
        }
    }

    /// Whether expression slot `slot` holds a data value rather than an index.
    pub fn is_data_slot(&self, slot: usize) -> bool {
        match self {
            Stmt::Assign(a) | Stmt::Reduce(a) => slot == a.idx.len(),
            _ => false,
        }
    }

    /// Substitute a variable in every expression, recursing into bodies.
    pub fn subst_var(&mut self, name: &str, value: &Expr) {
        for e in self.exprs_mut() {
            e.subst_var(name, value);
        }
        if let Some(body) = self.body_mut() {
            body.subst_var(name, value);
        }
    }

    /// Rename a buffer everywhere it is declared, written, read or windowed.
    pub fn rename_buffer(&mut self, from: &str, to: &str) {
        match self {
            Stmt::Assign(a) | Stmt::Reduce(a) if a.buf == from => a.buf = to.to_owned(),
            Stmt::Alloc(d) if d.name == from => d.name = to.to_owned(),
            Stmt::Call(c) => {
                for w in &mut c.args {
                    if w.buf == from {
                        w.buf = to.to_owned();
                    }
                }
            }
            _ => {}
        }
        for e in self.exprs_mut() {
            e.rename_buffer(from, to);
        }
        if let Some(body) = self.body_mut() {
            body.rename_buffer(from, to);
        }
    }

    /// Does this statement (or anything nested in it) mention variable `name`?
    pub fn mentions_var(&self, name: &str) -> bool {
        self.exprs().iter().any(|e| e.mentions_var(name))
            || self.body().is_some_and(|b| b.mentions_var(name))
    }

    /// Does this statement touch buffer `name` in any way?
    pub fn uses_buffer(&self, name: &str) -> bool {
        let direct = match self {
            Stmt::Assign(a) | Stmt::Reduce(a) => a.buf == name,
            Stmt::Call(c) => c.args.iter().any(|w| w.buf == name),
            _ => false,
        };
        direct
            || self.exprs().iter().any(|e| e.reads_buffer(name))
            || self.body().is_some_and(|b| b.uses_buffer(name))
    }
}

/// A statement sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stmt> {
        self.stmts.iter()
    }

    pub fn subst_var(&mut self, name: &str, value: &Expr) {
        for s in &mut self.stmts {
            s.subst_var(name, value);
        }
    }

    pub fn rename_buffer(&mut self, from: &str, to: &str) {
        for s in &mut self.stmts {
            s.rename_buffer(from, to);
        }
    }

    pub fn mentions_var(&self, name: &str) -> bool {
        self.stmts.iter().any(|s| s.mentions_var(name))
    }

    pub fn uses_buffer(&self, name: &str) -> bool {
        self.stmts.iter().any(|s| s.uses_buffer(name))
    }
}

impl From<Vec<Stmt>> for Block {
    fn from(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

impl<'a> IntoIterator for &'a Block {
    type Item = &'a Stmt;
    type IntoIter = std::slice::Iter<'a, Stmt>;

    fn into_iter(self) -> Self::IntoIter {
        self.stmts.iter()
    }
}

// ============================================================================
// Procedures
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    /// Integer size parameter, assumed to be at least 1.
    Size(String),
    Buffer(BufferDecl),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Size(n) => n,
            Param::Buffer(d) => &d.name,
        }
    }
}

/// A kernel, or a hardware template when `instr` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    /// Opaque emission text carried by hardware templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instr: Option<String>,
}

/// Address of a statement: indices into nested bodies starting at the
/// procedure body.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtPath(pub Vec<usize>);

impl StmtPath {
    pub fn root(index: usize) -> Self {
        StmtPath(vec![index])
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Index within the containing block.
    pub fn last(&self) -> usize {
        self.0.last().copied().unwrap_or(0)
    }

    /// Path of the enclosing statement, if any.
    pub fn parent(&self) -> Option<StmtPath> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(StmtPath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn child(&self, index: usize) -> StmtPath {
        let mut v = self.0.clone();
        v.push(index);
        StmtPath(v)
    }

    pub fn sibling(&self, index: usize) -> StmtPath {
        let mut v = self.0.clone();
        if let Some(last) = v.last_mut() {
            *last = index;
        }
        StmtPath(v)
    }

    pub fn is_prefix_of(&self, other: &StmtPath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl std::fmt::Display for StmtPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "/{}", parts.join("/"))
    }
}

impl Proc {
    pub fn new(name: impl Into<String>, params: Vec<Param>, body: Block) -> Self {
        Self {
            name: name.into(),
            params,
            body,
            instr: None,
        }
    }

    pub fn with_instr(mut self, instr: impl Into<String>) -> Self {
        self.instr = Some(instr.into());
        self
    }

    pub fn is_template(&self) -> bool {
        self.instr.is_some()
    }

    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name() == name)
    }

    pub fn buffer_param(&self, name: &str) -> Option<&BufferDecl> {
        match self.param(name)? {
            Param::Buffer(d) => Some(d),
            Param::Size(_) => None,
        }
    }

    pub fn sizes(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|p| match p {
            Param::Size(n) => Some(n.as_str()),
            Param::Buffer(_) => None,
        })
    }

    pub fn buffer_params(&self) -> impl Iterator<Item = &BufferDecl> {
        self.params.iter().filter_map(|p| match p {
            Param::Buffer(d) => Some(d),
            Param::Size(_) => None,
        })
    }

    pub fn stmt(&self, path: &StmtPath) -> Option<&Stmt> {
        let (first, rest) = path.0.split_first()?;
        let mut stmt = self.body.stmts.get(*first)?;
        for i in rest {
            stmt = stmt.body()?.stmts.get(*i)?;
        }
        Some(stmt)
    }

    pub fn stmt_mut(&mut self, path: &StmtPath) -> Option<&mut Stmt> {
        let (first, rest) = path.0.split_first()?;
        let mut stmt = self.body.stmts.get_mut(*first)?;
        for i in rest {
            stmt = stmt.body_mut()?.stmts.get_mut(*i)?;
        }
        Some(stmt)
    }

    /// The block that directly contains the statement at `path`.
    pub fn container(&self, path: &StmtPath) -> Option<&Block> {
        match path.parent() {
            None => Some(&self.body),
            Some(parent) => self.stmt(&parent)?.body(),
        }
    }

    pub fn container_mut(&mut self, path: &StmtPath) -> Option<&mut Block> {
        match path.parent() {
            None => Some(&mut self.body),
            Some(parent) => self.stmt_mut(&parent)?.body_mut(),
        }
    }

    /// Enclosing statements of `path`, innermost first.
    pub fn ancestors(&self, path: &StmtPath) -> Vec<(StmtPath, &Stmt)> {
        let mut out = Vec::new();
        let mut cur = path.parent();
        while let Some(p) = cur {
            if let Some(s) = self.stmt(&p) {
                out.push((p.clone(), s));
            }
            cur = p.parent();
        }
        out
    }

    /// Every name bound anywhere in the procedure: parameters, loop
    /// variables and allocations.
    pub fn bound_names(&self) -> BTreeSet<String> {
        fn collect(block: &Block, out: &mut BTreeSet<String>) {
            for s in block {
                match s {
                    Stmt::Loop(l) => {
                        out.insert(l.var.clone());
                    }
                    Stmt::Alloc(d) => {
                        out.insert(d.name.clone());
                    }
                    _ => {}
                }
                if let Some(b) = s.body() {
                    collect(b, out);
                }
            }
        }
        let mut out: BTreeSet<String> = self.params.iter().map(|p| p.name().to_owned()).collect();
        collect(&self.body, &mut out);
        out
    }

    /// Find a name not yet bound in this procedure, starting from `base`.
    pub fn fresh_name(&self, base: &str) -> String {
        let taken = self.bound_names();
        if !taken.contains(base) {
            return base.to_owned();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|n| !taken.contains(n))
            .unwrap_or_else(|| base.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matmul_body() -> Block {
        Block::new(vec![Stmt::Loop(Loop {
            var: "i".into(),
            bound: Expr::int(4),
            mode: LoopMode::Par,
            body: Block::new(vec![Stmt::Reduce(Assign {
                buf: "C".into(),
                idx: vec![Expr::var("i")],
                rhs: Expr::read("A", vec![Expr::var("i")]) * Expr::Float(2.0),
            })]),
        })])
    }

    #[test]
    fn test_stmt_paths() {
        let proc = Proc::new("f", vec![], matmul_body());
        let inner = StmtPath(vec![0, 0]);
        assert!(matches!(proc.stmt(&inner), Some(Stmt::Reduce(_))));
        assert_eq!(inner.parent(), Some(StmtPath::root(0)));
        assert_eq!(proc.ancestors(&inner).len(), 1);
        assert!(proc.stmt(&StmtPath(vec![0, 1])).is_none());
    }

    #[test]
    fn test_subst_var() {
        let mut body = matmul_body();
        body.stmts[0]
            .body_mut()
            .unwrap()
            .subst_var("i", &(Expr::var("io") * Expr::int(2)));
        let Stmt::Reduce(a) = &body.stmts[0].body().unwrap().stmts[0] else {
            panic!("expected reduce");
        };
        assert_eq!(a.idx[0], Expr::var("io") * Expr::int(2));
        assert!(a.rhs.mentions_var("io"));
    }

    #[test]
    fn test_rename_buffer() {
        let mut body = matmul_body();
        body.rename_buffer("A", "A2");
        assert!(body.uses_buffer("A2"));
        assert!(!body.uses_buffer("A"));
        assert!(body.uses_buffer("C"));
    }

    #[test]
    fn test_fresh_name() {
        let proc = Proc::new(
            "f",
            vec![Param::Size("i_1".into())],
            matmul_body(),
        );
        assert_eq!(proc.fresh_name("j"), "j");
        assert_eq!(proc.fresh_name("i"), "i_2");
    }

    #[test]
    fn test_register_space_rules() {
        assert!(MemorySpace::Avx2.supports(ScalarType::F32));
        assert!(!MemorySpace::Avx2.supports(ScalarType::F64));
        assert_eq!(MemorySpace::Avx2.lanes(ScalarType::F32), Some(8));
        assert_eq!(MemorySpace::Avx512.lanes(ScalarType::F32), Some(16));
        assert!(!MemorySpace::Dram.is_register());
    }
}
