use std::sync::Arc;

use spdb_exec::{Principals, QueryFunctor};
use spdb_types::RootDocument;

use crate::database::LocalDatabase;
use crate::node::{Node, ObservationNode};

/// Runs query functors over the collections of one database.
///
/// Each query sees a snapshot of the index taken when it starts, in key
/// order. Documents added during the run are not visited.
pub struct QueryRunner<'a, D: RootDocument> {
    db: &'a LocalDatabase<D>,
    principals: &'a Principals,
}

impl<'a, D: RootDocument> QueryRunner<'a, D> {
    pub fn new(db: &'a LocalDatabase<D>, principals: &'a Principals) -> Self {
        Self { db, principals }
    }

    /// Run `functor` over every program and return it.
    pub fn query_programs<F>(&self, mut functor: F) -> F
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>>,
    {
        self.run_programs(&mut functor);
        functor
    }

    pub fn query_nightly_records<F>(&self, mut functor: F) -> F
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>>,
    {
        self.run_nightly_records(&mut functor);
        functor
    }

    /// Run `functor` over every observation of every program, programs in
    /// key order and observations in program order.
    pub fn query_observations<F>(&self, mut functor: F) -> F
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>>,
    {
        self.run_observations(&mut functor);
        functor
    }

    pub fn run_programs<F>(&self, functor: &mut F)
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>> + ?Sized,
    {
        let nodes = self.db.manager().programs().list_all().into_iter().map(Node::Program);
        self.run(functor, nodes);
    }

    pub fn run_nightly_records<F>(&self, functor: &mut F)
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>> + ?Sized,
    {
        let nodes = self
            .db
            .manager()
            .nightly_records()
            .list_all()
            .into_iter()
            .map(Node::NightlyRecord);
        self.run(functor, nodes);
    }

    pub fn run_observations<F>(&self, functor: &mut F)
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>> + ?Sized,
    {
        let nodes = self
            .db
            .manager()
            .programs()
            .list_all()
            .into_iter()
            .flat_map(|program| {
                program
                    .observation_keys()
                    .into_iter()
                    .map(move |key| {
                        Node::Observation(ObservationNode {
                            program: Arc::clone(&program),
                            key,
                        })
                    })
                    .collect::<Vec<_>>()
            });
        self.run(functor, nodes);
    }

    fn run<F, I>(&self, functor: &mut F, nodes: I)
    where
        F: QueryFunctor<LocalDatabase<D>, Node<D>> + ?Sized,
        I: IntoIterator<Item = Node<D>>,
    {
        self.db
            .manager()
            .executor()
            .query(functor, self.db, nodes, self.principals);
    }
}
