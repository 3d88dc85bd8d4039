use crate::ast::*;
use crate::config::RewriteOptions;
use crate::substitute::subst_typ;
use std::collections::HashMap;
use std::rc::Rc;

pub struct ClassInfo {
    pub path: Path,
    pub is_trait: bool,
    pub typ_params: Idents,
    pub parents: Vec<Typ>,
    /// names of all members
    pub members: Vec<Ident>,
}

pub struct DatatypeInfo {
    pub path: Path,
    pub is_codatatype: bool,
    pub typ_params: Idents,
    pub ctors: Vec<DatatypeCtor>,
}

/// Read-only view of every declaration in the program, keyed by path.
/// Rebuilt between pass invocations, so it always reflects the rewrites done so far.
pub struct GlobalCtx {
    pub functions: HashMap<Fun, Rc<Function>>,
    pub methods: HashMap<Fun, Rc<Method>>,
    pub fields: HashMap<Path, Rc<Field>>,
    pub classes: HashMap<Path, ClassInfo>,
    pub datatypes: HashMap<Path, DatatypeInfo>,
    pub iterators: HashMap<Path, Rc<IteratorDecl>>,
    pub builtins: BuiltIns,
    pub options: Rc<RewriteOptions>,
}

impl GlobalCtx {
    pub fn new(program: &Program, options: &Rc<RewriteOptions>) -> Self {
        let mut ctx = GlobalCtx {
            functions: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            classes: HashMap::new(),
            datatypes: HashMap::new(),
            iterators: HashMap::new(),
            builtins: program.builtins.clone(),
            options: options.clone(),
        };
        for module in program.modules.iter() {
            for decl in module.decls.iter() {
                match decl {
                    TopLevelDecl::Class(c) => {
                        ctx.classes.insert(
                            c.path.clone(),
                            ClassInfo {
                                path: c.path.clone(),
                                is_trait: c.is_trait,
                                typ_params: c.typ_params.clone(),
                                parents: c.parents.clone(),
                                members: c.members.iter().map(|m| m.name().clone()).collect(),
                            },
                        );
                    }
                    TopLevelDecl::Datatype(d) => {
                        ctx.datatypes.insert(
                            d.path.clone(),
                            DatatypeInfo {
                                path: d.path.clone(),
                                is_codatatype: d.is_codatatype,
                                typ_params: d.typ_params.clone(),
                                ctors: d.ctors.clone(),
                            },
                        );
                    }
                    TopLevelDecl::Iterator(it) => {
                        ctx.iterators.insert(it.path.clone(), Rc::new(it.clone()));
                    }
                    TopLevelDecl::Newtype(_) | TopLevelDecl::TypeSynonym(_) => {}
                }
                for member in decl.members() {
                    match member {
                        Member::Field(f) => {
                            ctx.fields.insert(f.path.clone(), Rc::new(f.clone()));
                        }
                        Member::Function(f) => {
                            ctx.functions.insert(f.path.clone(), Rc::new(f.clone()));
                        }
                        Member::Method(m) => {
                            ctx.methods.insert(m.path.clone(), Rc::new(m.clone()));
                        }
                    }
                }
            }
        }
        ctx
    }

    pub fn function(&self, fun: &Fun) -> Option<&Rc<Function>> {
        self.functions.get(fun)
    }

    pub fn method(&self, fun: &Fun) -> Option<&Rc<Method>> {
        self.methods.get(fun)
    }

    pub fn field(&self, path: &Path) -> Option<&Rc<Field>> {
        self.fields.get(path)
    }

    pub fn ctor(&self, datatype: &Path, variant: &Ident) -> Option<&DatatypeCtor> {
        self.datatypes.get(datatype)?.ctors.iter().find(|c| &c.name == variant)
    }

    /// The constructors that declare the destructor `path` (datatype path, then destructor name)
    pub fn destructor_ctors(&self, path: &Path) -> Option<Vec<&DatatypeCtor>> {
        let info = self.datatypes.get(&path.pop_segment())?;
        let name = path.last();
        let ctors: Vec<&DatatypeCtor> =
            info.ctors.iter().filter(|c| c.params.iter().any(|p| &p.var.name == name)).collect();
        if ctors.is_empty() { None } else { Some(ctors) }
    }

    pub fn is_recursive_function(&self, fun: &Fun) -> bool {
        self.functions.get(fun).map_or(false, |f| f.is_recursive)
    }

    pub fn class_has_member(&self, class: &Path, name: &str) -> bool {
        self.classes.get(class).map_or(false, |c| c.members.iter().any(|m| m.as_str() == name))
    }

    /// If `class` (transitively) extends `target`, the type arguments it passes to `target`,
    /// in terms of `class`'s own type parameters
    pub fn parent_args(&self, class: &Path, target: &Path) -> Option<Typs> {
        self.parent_args_rec(class, target, 0)
    }

    fn parent_args_rec(&self, class: &Path, target: &Path, depth: usize) -> Option<Typs> {
        if depth > self.classes.len() {
            // cyclic extends clauses are rejected by resolution
            return None;
        }
        let info = self.classes.get(class)?;
        for parent in info.parents.iter() {
            if let TypX::Class { path, args, .. } = &**parent {
                if path == target {
                    return Some(args.clone());
                }
                if let Some(grand_args) = self.parent_args_rec(path, target, depth + 1) {
                    // express the grandparent's arguments in terms of `class`'s parameters
                    let parent_info = self.classes.get(path)?;
                    let map: HashMap<Ident, Typ> =
                        parent_info.typ_params.iter().cloned().zip(args.iter().cloned()).collect();
                    return Some(Rc::new(grand_args.iter().map(|t| subst_typ(t, &map)).collect()));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast_util::*;
    use crate::test_util::*;

    #[test]
    fn parent_args_follow_extends_chains() {
        // trait T<A>; trait U<B> extends T<seq<B>>; class C<X> extends U<X>
        let t = mk_path(&["M", "T"]);
        let u = mk_path(&["M", "U"]);
        let c = mk_path(&["M", "C"]);
        let mut td = ClassDecl::new(&sp(), &t);
        td.is_trait = true;
        td.typ_params = idents(&["A"]);
        let mut ud = ClassDecl::new(&sp(), &u);
        ud.is_trait = true;
        ud.typ_params = idents(&["B"]);
        ud.parents = vec![Rc::new(TypX::Class {
            path: t.clone(),
            args: Rc::new(vec![seq_typ(&typ_param("B"))]),
            nullable: false,
        })];
        let mut cd = ClassDecl::new(&sp(), &c);
        cd.typ_params = idents(&["X"]);
        cd.parents =
            vec![Rc::new(TypX::Class { path: u.clone(), args: Rc::new(vec![typ_param("X")]), nullable: false })];
        let mut module = Module::new(&sp(), "M");
        module.decls =
            vec![TopLevelDecl::Class(td), TopLevelDecl::Class(ud), TopLevelDecl::Class(cd)];
        let program = Program::new("p", vec![module]);
        let ctx = GlobalCtx::new(&program, &Rc::new(RewriteOptions::default()));
        let args = ctx.parent_args(&c, &t).unwrap();
        assert_eq!(args[0].to_string(), "seq<X>");
        assert!(ctx.parent_args(&t, &c).is_none());
    }
}
